//! Local browser control: the tab host capability, the primitive action
//! backend, and the CDP implementation used in production.

pub mod backend;
pub mod cdp;
pub mod chrome;
pub mod host;

pub use backend::{LocalBackend, PrimitiveAction};
pub use cdp::CdpClient;
pub use chrome::CdpHost;
pub use host::TabHost;
