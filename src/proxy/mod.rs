//! Proxies for the DBus services we consume.
//!
//! These follow the output of [zbus-xmlgen](https://docs.rs/crate/zbus_xmlgen/latest)
//! run against the interface XML published with
//! [Waybar](https://github.com/Alexays/Waybar/tree/master/protocol), with the
//! default arguments to the [proxy](https://docs.rs/zbus/4.4.0/zbus/attr.proxy.html)
//! macro adjusted where the defaults don't fit (per-item destinations and
//! menu object paths are only known at runtime).
//!
//! For more information, see ["Writing a client proxy" in the zbus
//! tutorial](https://dbus2.github.io/zbus/).

pub mod dbus_menu;
pub mod dbus_status_notifier_item;
pub mod dbus_status_notifier_watcher;
