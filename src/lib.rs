// SIMPLE-THERMAL -- CLOSED-LOOP CPU THERMAL MITIGATION FOR LINUX
//
// PURE MODULES (zone, window, sensor, clamp, event, config) HAVE NO SYSTEM
// DEPENDENCIES AND ARE TESTED OFFLINE. sysfs IS THE ONLY MODULE THAT TOUCHES
// THE KERNEL. control AND driver ONLY SEE THE platform TRAITS.

pub mod clamp;
pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod event;
pub mod platform;
pub mod sensor;
pub mod switch;
pub mod sysfs;
pub mod window;
pub mod zone;
