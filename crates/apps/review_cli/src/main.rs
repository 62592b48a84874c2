mod client;
mod config;
mod session;
mod stack_info;

use std::collections::BTreeMap;
use std::error::Error;

use clap::{Parser, Subcommand};
use foundation::ids::{NodeId, SkeletonId, StackId, UserId};
use futures_util::StreamExt;
use gpu::backend::RecordingBackend;
use gpu::context::RenderContextRegistry;
use layers::layer::LayerId;
use layers::tile_layer::{TileLayer, TileLayerConfig};
use review::navigator::ReviewNavigator;
use review::reviewers::ReviewerSet;
use review::source::SkeletonSources;
use review::status::{ReviewColumn, ReviewTable, background_color, format_percentage};
use runtime::budget::FrameBudget;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::client::CatmaidClient;
use crate::config::{ConnectionArgs, ReviewArgs};
use crate::session::{ReviewSession, forward_notices, review_queue};

#[derive(Parser, Debug)]
#[command(author, version, about = "Segment-wise review of CATMAID skeletons")]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the review status of a skeleton's segments
    Segments {
        skeleton: u64,

        /// Restrict to the arbor downstream of this node
        #[arg(long)]
        subarbor: Option<u64>,

        /// Use the ten step colour scale for partial reviews
        #[arg(long)]
        detailed: bool,
    },

    /// Review skeletons segment by segment, driven from stdin
    Review {
        /// Skeletons to review, in order
        #[arg(required = true, value_delimiter = ',')]
        skeletons: Vec<u64>,

        /// Stack the view moves through
        #[arg(long)]
        stack: u64,

        #[arg(long)]
        subarbor: Option<u64>,

        /// Name of the group the queued skeletons are loaded as
        #[arg(long)]
        group: Option<String>,

        #[command(flatten)]
        review: ReviewArgs,
    },

    /// Download the tiles around every node the user has yet to review
    Prefetch {
        skeleton: u64,

        #[arg(long)]
        stack: u64,

        /// Zoom level the tiles are cached for
        #[arg(long, default_value_t = 0.0)]
        scale: f64,

        #[arg(long, default_value_t = 1024)]
        width: u32,

        #[arg(long, default_value_t = 768)]
        height: u32,

        /// Concurrent downloads
        #[arg(long, default_value_t = 8)]
        parallel: u32,
    },

    /// Show or edit the reviewer whitelist
    Whitelist {
        #[command(subcommand)]
        action: Option<WhitelistAction>,
    },

    /// Remove all of your own reviews from a skeleton
    ResetOwn {
        skeleton: u64,

        /// Reviews are only reset when they are also stored
        #[arg(long)]
        no_persist: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WhitelistAction {
    /// Accept a reviewer's reviews made after a date (RFC 3339)
    Add {
        reviewer: u64,
        #[arg(long)]
        after: Option<String>,
    },
    Remove {
        reviewer: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let connection = args.connection.resolve()?;
    let user = connection.user;
    let client = CatmaidClient::new(&connection);
    info!("project {} at {}", client.project(), connection.base_url);

    match args.command {
        Cmd::Segments {
            skeleton,
            subarbor,
            detailed,
        } => {
            print_segments(
                &client,
                user,
                SkeletonId(skeleton),
                subarbor.map(NodeId),
                detailed,
            )
            .await
        }
        Cmd::Review {
            skeletons,
            stack,
            subarbor,
            group,
            review,
        } => {
            let info = client.stack_info(StackId(stack)).await?;
            let stack = info.stack()?;
            let mut reviewers = ReviewerSet::new(user);
            if review.follow.is_empty() {
                reviewers.set_whitelist(client.whitelist().await?);
            } else {
                reviewers.set_follow_whitelist(false);
                for id in &review.follow {
                    reviewers.follow(UserId(*id));
                }
            }
            let navigator = ReviewNavigator::new(review.review_config(), reviewers);

            let mut sources = SkeletonSources::new();
            let ids: Vec<SkeletonId> = skeletons.into_iter().map(SkeletonId).collect();
            let queue = review_queue(&mut sources, &ids, group.as_deref())?;
            ReviewSession::run(
                client,
                navigator,
                stack,
                sources,
                queue,
                subarbor.map(NodeId),
            )
            .await
        }
        Cmd::Prefetch {
            skeleton,
            stack,
            scale,
            width,
            height,
            parallel,
        } => {
            prefetch(
                &client,
                user,
                SkeletonId(skeleton),
                StackId(stack),
                scale,
                (width, height),
                parallel,
            )
            .await
        }
        Cmd::Whitelist { action } => edit_whitelist(&client, action).await,
        Cmd::ResetOwn {
            skeleton,
            no_persist,
        } => {
            let mut navigator = ReviewNavigator::new(Default::default(), ReviewerSet::new(user));
            navigator.config_mut().persist_review = !no_persist;
            let skeleton = SkeletonId(skeleton);
            navigator.load_segments(skeleton, None, client.segments(skeleton, None).await?);
            let target = navigator.reset_own_reviews_target();
            forward_notices(navigator.drain_notices());
            if let Some(skeleton) = target {
                client.reset_own_reviews(skeleton).await?;
                info!("reviews of user {user} on skeleton {skeleton} removed");
            }
            Ok(())
        }
    }
}

async fn print_segments(
    client: &CatmaidClient,
    user: UserId,
    skeleton: SkeletonId,
    subarbor: Option<NodeId>,
    detailed: bool,
) -> Result<(), Box<dyn Error>> {
    let segments = client.segments(skeleton, subarbor).await?;
    let users = client.usernames().await?;
    let whitelist = client.whitelist().await?;
    let table = ReviewTable::build(&segments, &users, user, &whitelist);

    println!("Revisions: {}", table.revisions());
    let columns: Vec<ReviewColumn> = if table.shows_reviewer_columns() {
        table.reviewers.iter().map(|r| r.column).collect()
    } else {
        Vec::new()
    };
    let mut header = vec!["segment".to_string(), "nodes".to_string(), "union".to_string()];
    header.extend(
        table
            .reviewers
            .iter()
            .filter(|r| columns.contains(&r.column))
            .map(|r| r.name.clone()),
    );
    println!("{}", header.join("\t"));
    for segment in &segments {
        let mut row = vec![
            segment.id.to_string(),
            segment.nr_nodes.to_string(),
            format!(
                "{}% {}",
                format_percentage(segment.status),
                background_color(segment.status, detailed)
            ),
        ];
        row.extend(
            columns
                .iter()
                .map(|&c| format_percentage(table.status(c, segment))),
        );
        println!("{}", row.join("\t"));
    }
    Ok(())
}

async fn prefetch(
    client: &CatmaidClient,
    user: UserId,
    skeleton: SkeletonId,
    stack: StackId,
    scale: f64,
    (width, height): (u32, u32),
    parallel: u32,
) -> Result<(), Box<dyn Error>> {
    let info = client.stack_info(stack).await?;
    let stack = info.stack()?;
    let source = info.tile_source()?;

    let mut navigator = ReviewNavigator::new(Default::default(), ReviewerSet::new(user));
    navigator.load_segments(skeleton, None, client.segments(skeleton, None).await?);
    let plan = navigator.prefetch_locations();
    if plan.locations.is_empty() {
        info!("nothing left to review on skeleton {skeleton}");
        return Ok(());
    }

    let mut registry = RenderContextRegistry::new();
    let context = registry.get_or_create(stack.id, || Box::new(RecordingBackend::new()));
    let mut layer = TileLayer::new(
        LayerId(1),
        stack,
        source,
        TileLayerConfig::default(),
        context,
        width,
        height,
    )?;
    let report = layer.cache_locations(&plan.locations, scale)?;
    info!(
        "{} locations from segment {:?} to {:?}: {} tiles queued, {} cached, {} dropped",
        plan.locations.len(),
        plan.first_segment,
        plan.last_segment,
        report.queued,
        report.cached,
        report.dropped
    );

    let mut outcomes: BTreeMap<&str, usize> = BTreeMap::new();
    loop {
        let batch = layer.next_loads(&mut FrameBudget::new(parallel.max(1)));
        if batch.is_empty() {
            break;
        }
        let results: Vec<_> = futures_util::stream::iter(batch)
            .map(|fetch| async move {
                let result = client.fetch_tile(&fetch.url).await;
                (fetch, result)
            })
            .buffer_unordered(parallel.max(1) as usize)
            .collect()
            .await;
        for (fetch, result) in results {
            match result {
                Ok(bytes) => {
                    layer.tile_loaded(fetch.request, bytes)?;
                    *outcomes.entry("loaded").or_default() += 1;
                }
                Err(e) => {
                    warn!("{}: {e}", fetch.url);
                    layer.tile_failed(fetch.request);
                    *outcomes.entry("failed").or_default() += 1;
                }
            }
        }
    }
    info!("prefetch done: {outcomes:?}");
    Ok(())
}

async fn edit_whitelist(
    client: &CatmaidClient,
    action: Option<WhitelistAction>,
) -> Result<(), Box<dyn Error>> {
    let mut whitelist = client.whitelist().await?;
    match action {
        None => {
            let users = client.usernames().await?;
            for (reviewer, after) in whitelist.iter() {
                let name = users
                    .get(&reviewer)
                    .cloned()
                    .unwrap_or_else(|| format!("user {reviewer}"));
                println!("{name}\t{}", after.to_rfc3339());
            }
            return Ok(());
        }
        Some(WhitelistAction::Add { reviewer, after }) => {
            let users = client.usernames().await?;
            whitelist.add_checked(UserId(reviewer), after.as_deref(), &users)?;
        }
        Some(WhitelistAction::Remove { reviewer }) => {
            if !whitelist.remove(UserId(reviewer)) {
                warn!("user {reviewer} is not on the whitelist");
                return Ok(());
            }
        }
    }
    client.store_whitelist(&whitelist).await?;
    info!("whitelist saved with {} reviewers", whitelist.len());
    Ok(())
}
