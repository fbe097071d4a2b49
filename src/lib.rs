//! A StatusNotifierItem (SNI) tray protocol stack.
//!
//! This crate implements the freedesktop/KDE tray protocols as a set of
//! cooperating pieces:
//!
//! - [`watcher::Watcher`]: the `org.kde.StatusNotifierWatcher` registry of
//!   live hosts and items,
//! - [`host`]: discovery of items through the watcher, delivering them to a
//!   [`host::Tray`] implementation,
//! - [`item::ItemProxy`]: a per-icon mirror of one remote item's properties,
//! - [`menu::RemoteMenu`] and [`layout`]: a mirror of the item's
//!   `com.canonical.dbusmenu` context menu tree,
//! - [`icon`] and [`theme`]: pixmap decoding and icon-theme lookup.
//!
//! Everything speaks D-Bus through [zbus](https://dbus2.github.io/zbus/);
//! widget construction and painting are left to the consumer.

pub mod error;
pub mod host;
pub mod icon;
pub mod item;
pub mod layout;
pub mod menu;
pub mod proxy;
pub mod theme;
pub mod watcher;

pub use error::{Error, Result};

pub(crate) mod names {
    pub const WATCHER_BUS: &str = "org.kde.StatusNotifierWatcher";
    pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";

    pub const HOST_OBJECT: &str = "/StatusNotifierHost";
    pub const ITEM_OBJECT: &str = "/StatusNotifierItem";
}
