pub use crate::control::*;
pub use crate::framework::config::{GuestConfig, HostConfig};
pub use crate::framework::logging::init_logger;
pub use crate::framework::logging::{debug, error, info, trace, warn};
pub use crate::guest::{
    Applied, AssetKind, AssetLoadEvent, AssetLoader, AssetMapping, ErrorReporter,
    FileLoader, GameState, GameStatus, Guest, LoadedImage, ScoreData,
    ScoreRecord, SubmitInFlight, SubmitOutcome, install_error_hook,
};
pub use crate::host::{GuestMirror, Host, HostEvent};
pub use crate::protocol::{GuestMessage, HostMessage, PROTOCOL_VERSION};
pub use crate::runtime::process::{HostBridge, connect_to_host};
pub use crate::runtime::transport::{Link, ipc_pair, local_pair};
