use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use zbus::{export::ordered_stream::OrderedStreamExt, interface, Interface};

use crate::names;

/// Registration records owned by the [`Watcher`].
///
/// Host watches are keyed by `(bus_name, object_path)` and at most one may
/// exist per key. Item watches are keyed by the concatenated
/// `bus_name + object_path` id and tolerate duplicate registrations (see
/// [`Watches::add_item`]).
#[derive(Debug, Default)]
pub(crate) struct Watches {
    hosts: HashSet<(String, String)>,
    items: HashSet<String>,
}

impl Watches {
    /// Track a new host watch. `Ok(true)` means this was the first host.
    ///
    /// A host already watched at the same address is an error; the caller
    /// maps it to `InvalidArgs`.
    pub(crate) fn add_host(&mut self, bus_name: &str, object_path: &str) -> Result<bool, ()> {
        if !self
            .hosts
            .insert((bus_name.to_owned(), object_path.to_owned()))
        {
            return Err(());
        }
        Ok(self.hosts.len() == 1)
    }

    /// Drop a host watch. `true` means it was the last one.
    pub(crate) fn remove_host(&mut self, bus_name: &str, object_path: &str) -> bool {
        let did_remove = self
            .hosts
            .remove(&(bus_name.to_owned(), object_path.to_owned()));
        did_remove && self.hosts.is_empty()
    }

    /// Track a new item watch. `false` means the id was already watched.
    ///
    /// Duplicates are not an error: some client libraries re-register the
    /// same item on reconnect and expect success.
    pub(crate) fn add_item(&mut self, id: &str) -> bool {
        self.items.insert(id.to_owned())
    }

    pub(crate) fn remove_item(&mut self, id: &str) -> bool {
        self.items.remove(id)
    }

    pub(crate) fn any_hosts(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub(crate) fn items(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }
}

/// An instance of [`org.kde.StatusNotifierWatcher`]. It only tracks what tray
/// items and trays exist, and doesn't have any logic for displaying items
/// (for that, see [`host`][`crate::host`]).
///
/// [`org.kde.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
#[derive(Debug)]
pub struct Watcher {
    tokio_rt: tokio::runtime::Handle,

    // std::sync::Mutex, never held across an await.
    watches: Arc<Mutex<Watches>>,
}

#[interface(name = "org.kde.StatusNotifierWatcher")]
impl Watcher {
    /// RegisterStatusNotifierHost method
    async fn register_status_notifier_host(
        &self,
        service: &str,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctx: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let (bus_name, object_path) = parse_service(service, hdr.sender(), names::HOST_OBJECT)?;
        log::trace!("registering new host: {}{}", bus_name, object_path);

        let added_first = {
            // scoped around locking of watches
            let mut watches = self.watches.lock().unwrap(); // unwrap: mutex poisoning is okay
            match watches.add_host(&bus_name, &object_path) {
                Ok(first) => first,
                Err(()) => {
                    log::warn!("host already registered at {}{}", bus_name, object_path);
                    return Err(zbus::fdo::Error::InvalidArgs(format!(
                        "host already registered at {}{}",
                        bus_name, object_path
                    )));
                }
            }
        };

        if added_first {
            // property changed
            self.is_status_notifier_host_registered_changed(&ctx).await?;
            Watcher::status_notifier_host_registered(&ctx).await?;
        }

        self.tokio_rt.spawn({
            let watches = self.watches.clone();
            let ctx = ctx.to_owned();
            let con = con.to_owned();
            async move {
                if let Err(e) = wait_for_service_exit(&con, &bus_name).await {
                    log::warn!("failed to wait for service exit: {}", e);
                }
                log::debug!("lost host: {}{}", bus_name, object_path);

                let removed_last = {
                    let mut watches = watches.lock().unwrap(); // unwrap: mutex poisoning is okay
                    watches.remove_host(&bus_name, &object_path)
                };

                if removed_last {
                    if let Err(e) = Watcher::is_status_notifier_host_registered_refresh(&ctx).await
                    {
                        log::warn!("failed to signal Watcher: {}", e);
                    }
                    // re-emitted as the change notification; there is no
                    // HostUnregistered signal on this interface
                    if let Err(e) = Watcher::status_notifier_host_registered(&ctx).await {
                        log::warn!("failed to signal Watcher: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    /// RegisterStatusNotifierItem method
    async fn register_status_notifier_item(
        &self,
        service: &str,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctx: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let (bus_name, object_path) = parse_service(service, hdr.sender(), names::ITEM_OBJECT)?;

        let item = format!("{}{}", bus_name, object_path);

        {
            let mut watches = self.watches.lock().unwrap(); // unwrap: mutex poisoning is okay
            if !watches.add_item(&item) {
                // we're already tracking them
                log::debug!("new item: {} (duplicate)", item);
                return Ok(());
            } else {
                log::debug!("new item: {}", item);
            }
        }

        self.registered_status_notifier_items_changed(&ctx).await?;
        Watcher::status_notifier_item_registered(&ctx, item.as_ref()).await?;

        self.tokio_rt.spawn({
            let watches = self.watches.clone();
            let ctx = ctx.to_owned();
            let con = con.to_owned();
            async move {
                if let Err(e) = wait_for_service_exit(&con, &bus_name).await {
                    log::warn!("failed to wait for service exit: {}", e);
                }
                log::debug!("lost item: {}", item);

                {
                    let mut watches = watches.lock().unwrap(); // unwrap: mutex poisoning is okay
                    if !watches.remove_item(&item) {
                        return;
                    }
                }

                if let Err(e) = Watcher::registered_status_notifier_items_refresh(&ctx).await {
                    log::warn!("failed to signal Watcher: {}", e);
                }
                if let Err(e) =
                    Watcher::status_notifier_item_unregistered(&ctx, item.as_ref()).await
                {
                    log::warn!("failed to signal Watcher: {}", e);
                }
            }
        });

        Ok(())
    }

    /// StatusNotifierHostRegistered signal
    #[zbus(signal)]
    async fn status_notifier_host_registered(ctx: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// StatusNotifierItemRegistered signal
    #[zbus(signal)]
    async fn status_notifier_item_registered(
        ctx: &zbus::SignalContext<'_>,
        service: &str,
    ) -> zbus::Result<()>;

    /// StatusNotifierItemUnregistered signal
    #[zbus(signal)]
    async fn status_notifier_item_unregistered(
        ctx: &zbus::SignalContext<'_>,
        service: &str,
    ) -> zbus::Result<()>;

    /// IsStatusNotifierHostRegistered property
    #[zbus(property)]
    async fn is_status_notifier_host_registered(&self) -> bool {
        self.watches.lock().unwrap().any_hosts()
    }

    /// ProtocolVersion property
    #[zbus(property)]
    async fn protocol_version(&self) -> i32 {
        0
    }

    /// RegisteredStatusNotifierItems property
    #[zbus(property)]
    async fn registered_status_notifier_items(&self) -> Vec<String> {
        self.watches.lock().unwrap().items()
    }
}

impl Watcher {
    pub fn new(rt: tokio::runtime::Handle) -> Self {
        Self {
            tokio_rt: rt,
            watches: Arc::new(Mutex::new(Watches::default())),
        }
    }

    pub async fn attach_to(self, con: &zbus::Connection) -> zbus::Result<()> {
        // register /StatusNotifierWatcher service
        if !con.object_server().at(names::WATCHER_OBJECT, self).await? {
            return Err(zbus::Error::Failure(format!(
                "Object already exists at {} on this connection -- is StatusNotifierWatcher already running?",
                names::WATCHER_OBJECT
            )));
        }

        // try to alias self object as org.kde.StatusNotifierWatcher
        // not AllowReplacement, not ReplaceExisting, not DoNotQueue
        let flags: [zbus::fdo::RequestNameFlags; 0] = [];
        match con
            .request_name_with_flags(names::WATCHER_BUS, flags.into_iter().collect())
            .await
        {
            Ok(zbus::fdo::RequestNameReply::PrimaryOwner) => {
                log::debug!("Primary owner");
                Ok(())
            }
            Ok(_) | Err(zbus::Error::NameTaken) => {
                log::debug!("Name taken");
                Ok(())
            } // defer to existing
            Err(e) => Err(e),
        }
    }

    /// Equivalent to `is_status_notifier_host_registered_invalidate`, but without requiring
    /// `self`.
    async fn is_status_notifier_host_registered_refresh(
        ctxt: &zbus::SignalContext<'_>,
    ) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &["IsStatusNotifierHostRegistered"],
        )
        .await
    }

    /// Equivalent to `registered_status_notifier_items_invalidate`, but without requiring `self`.
    async fn registered_status_notifier_items_refresh(
        ctxt: &zbus::SignalContext<'_>,
    ) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &["RegisteredStatusNotifierItems"],
        )
        .await
    }
}

/// Decode the service name that registrants give to us, into the bus name and
/// the object path within the connection.
///
/// The freedesktop.org specification has the format of this be just the bus
/// name, however some status items pass non-conforming values. One common one
/// is just the object path; in that case the bus name is the caller's sender.
fn parse_service(
    service: &str,
    sender: Option<&zbus::names::UniqueName<'_>>,
    default_object: &'static str,
) -> zbus::fdo::Result<(String, String)> {
    if service.starts_with('/') {
        // they sent us just the object path
        if let Some(sender) = sender {
            Ok((sender.to_string(), service.to_owned()))
        } else {
            log::warn!("unknown sender for service {:?}", service);
            Err(zbus::fdo::Error::InvalidArgs("Unknown bus address".into()))
        }
    } else {
        // validate the bus name they gave us; well-known names are kept
        // as-is, NameOwnerChanged tracks those too
        match zbus::names::BusName::try_from(service) {
            Ok(busname) => Ok((busname.to_string(), default_object.to_owned())),
            Err(e) => {
                log::warn!("received invalid bus name {:?}: {}", service, e);
                Err(zbus::fdo::Error::InvalidArgs(e.to_string()))
            }
        }
    }
}

/// Wait for a DBus name to disappear from the bus.
pub(crate) async fn wait_for_service_exit(
    con: &zbus::Connection,
    service: &str,
) -> zbus::fdo::Result<()> {
    let service = zbus::names::BusName::try_from(service)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
    let dbus = zbus::fdo::DBusProxy::new(con).await?;
    let mut owner_changes = dbus
        .receive_name_owner_changed_with_args(&[(0, &service)])
        .await?;

    if !dbus.name_has_owner(service.as_ref()).await? {
        // service has already disappeared
        return Ok(());
    }

    while let Some(sig) = owner_changes.next().await {
        let args = sig.args()?;
        if args.new_owner().is_none() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_service_resolves_against_sender() {
        let sender = zbus::names::UniqueName::try_from(":1.42").unwrap();
        let (bus_name, object_path) =
            parse_service("/org/ayatana/NotificationItem/nm_applet", Some(&sender), names::ITEM_OBJECT)
                .unwrap();
        assert_eq!(bus_name, ":1.42");
        assert_eq!(object_path, "/org/ayatana/NotificationItem/nm_applet");

        // no sender to resolve against
        assert!(parse_service("/StatusNotifierItem", None, names::ITEM_OBJECT).is_err());
    }

    #[test]
    fn bus_name_service_gets_the_default_object_path() {
        let (bus_name, object_path) = parse_service(":1.42", None, names::HOST_OBJECT).unwrap();
        assert_eq!(bus_name, ":1.42");
        assert_eq!(object_path, "/StatusNotifierHost");

        let (bus_name, object_path) =
            parse_service("org.kde.StatusNotifierItem-4077-1", None, names::ITEM_OBJECT).unwrap();
        assert_eq!(bus_name, "org.kde.StatusNotifierItem-4077-1");
        assert_eq!(object_path, "/StatusNotifierItem");

        // not a valid bus name
        assert!(parse_service("not a bus name", None, names::ITEM_OBJECT).is_err());
    }

    #[test]
    fn first_and_last_host_flip_registration() {
        let mut watches = Watches::default();
        assert_eq!(watches.add_host(":1.7", "/StatusNotifierHost"), Ok(true));
        assert!(watches.any_hosts());
        assert_eq!(watches.add_host(":1.8", "/StatusNotifierHost"), Ok(false));

        assert!(!watches.remove_host(":1.7", "/StatusNotifierHost"));
        assert!(watches.remove_host(":1.8", "/StatusNotifierHost"));
        assert!(!watches.any_hosts());
    }

    #[test]
    fn duplicate_host_at_same_address_is_rejected() {
        let mut watches = Watches::default();
        watches.add_host(":1.7", "/StatusNotifierHost").unwrap();
        assert_eq!(watches.add_host(":1.7", "/StatusNotifierHost"), Err(()));
        // same bus name at a different path is a distinct watch
        assert_eq!(watches.add_host(":1.7", "/other"), Ok(false));
    }

    #[test]
    fn duplicate_item_keeps_cardinality() {
        let mut watches = Watches::default();
        assert!(watches.add_item(":1.50/StatusNotifierItem"));
        assert!(!watches.add_item(":1.50/StatusNotifierItem"));
        assert_eq!(watches.items().len(), 1);
    }

    #[test]
    fn item_removal_updates_registered_list() {
        let mut watches = Watches::default();
        watches.add_item(":1.50/StatusNotifierItem");
        watches.add_item(":1.51/StatusNotifierItem");

        assert!(watches.remove_item(":1.50/StatusNotifierItem"));
        assert_eq!(watches.items(), vec![":1.51/StatusNotifierItem"]);
        // removing an unknown id is a no-op
        assert!(!watches.remove_item(":1.50/StatusNotifierItem"));
    }
}
