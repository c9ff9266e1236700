//! hsrecon Agents
//!
//! Protocol scanners and analysis passes run against one hidden service:
//! - **Web**: port 80 detection, then the onion spider
//! - **VNC**: port 5900 detection and RFB identification
//! - **FTP**: port 21 detection
//! - **Exposed directories**: directory listings among crawled pages
//! - **Mailto**: email addresses, recorded as correlation edges
//!
//! The runtime iterates the tables in [`registry`].

pub mod exposed_directories;
pub mod ftp;
pub mod mailto;
pub mod registry;
pub mod traits;
pub mod vnc;
pub mod web;

pub use exposed_directories::*;
pub use ftp::*;
pub use mailto::*;
pub use registry::*;
pub use traits::*;
pub use vnc::*;
pub use web::*;
