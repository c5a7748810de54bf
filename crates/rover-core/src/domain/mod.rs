//! Domain logic: device identity and status, the presence registry and the
//! OTA transfer engine.

pub mod device;
pub mod ota;
pub mod registry;
