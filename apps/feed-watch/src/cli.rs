use clap::{Parser, Subcommand};
use feed_sync::{FeedScope, ReactionKey, View};

#[derive(Parser, Debug)]
#[command(name = "feed-watch")]
#[command(about = "Load a feed view and keep printing it as pushed updates arrive")]
pub struct Cli {
    /// REST API base URL (e.g., http://localhost:9000)
    #[arg(long, env = "FEED_API_BASE")]
    pub api: Option<String>,

    /// WebSocket endpoint for pushed updates (e.g., ws://localhost:9000/ws)
    #[arg(long, env = "FEED_WS_URL")]
    pub ws: Option<String>,

    /// Viewer's user id; required for `feed --mine`
    #[arg(long, env = "FEED_VIEWER_ID")]
    pub viewer: Option<String>,

    /// Pages to load before watching
    #[arg(short = 'p', long, default_value_t = 1)]
    pub pages: u32,

    /// Print once and exit instead of watching
    #[arg(long)]
    pub once: bool,

    /// Reopen the push connection this many seconds after it drops
    #[arg(long)]
    pub reconnect_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// The global request feed
    Feed {
        /// Show the viewer's own feed instead
        #[arg(long)]
        mine: bool,
    },
    /// Responses to one request
    Responses {
        /// Request id
        request_id: String,
    },
    /// Reactions on a request
    Reactions {
        /// Treat the id as a response id
        #[arg(long)]
        response: bool,

        /// Request or response id
        id: String,
    },
}

impl Commands {
    pub fn view(&self) -> View {
        match self {
            Commands::Feed { mine: false } => View::Feed(FeedScope::Global),
            Commands::Feed { mine: true } => View::Feed(FeedScope::Personal),
            Commands::Responses { request_id } => View::Request(request_id.clone()),
            Commands::Reactions { response: false, id } => View::Reactions(ReactionKey::request(id.clone())),
            Commands::Reactions { response: true, id } => View::Reactions(ReactionKey::response(id.clone())),
        }
    }
}
