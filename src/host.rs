use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use zbus::export::ordered_stream::{self, OrderedStreamExt};

use crate::{
    item::{ItemEvent, ItemProxy},
    names,
    proxy::dbus_status_notifier_watcher::{
        StatusNotifierItemRegistered, StatusNotifierItemUnregistered, StatusNotifierWatcherProxy,
    },
    theme::IconThemeService,
};

/// What a tray implementation must provide to consume items.
///
/// `force_redraw` and `style_updated` are optional hooks for consumers that
/// batch their own drawing.
pub trait Tray {
    fn on_item_added(
        &mut self,
        id: &str,
        item: ItemProxy,
        events: tokio::sync::mpsc::UnboundedReceiver<ItemEvent>,
    );
    fn on_item_removed(&mut self, id: &str);
    fn force_redraw(&mut self) {}
    fn style_updated(&mut self) {}
}

/// Register this DBus connection as a StatusNotifierHost (i.e. system tray).
///
/// This associates with the DBus connection a new name of the format
/// `org.freedesktop.StatusNotifierHost-{pid}-{nr}`, and registers it to the
/// active StatusNotifierWatcher. The name and the StatusNotifierWatcher proxy
/// are returned.
///
/// You still need to call [`run_host`] to be notified of new and removed
/// items.
pub async fn register_as_host(
    con: &zbus::Connection,
) -> zbus::Result<(
    zbus::names::WellKnownName<'static>,
    StatusNotifierWatcherProxy<'static>,
)> {
    let snw = StatusNotifierWatcherProxy::new(con).await?;

    // get a well-known name
    let pid = std::process::id();
    let mut i = 0;
    let wellknown = loop {
        use zbus::fdo::RequestNameReply::*;

        i += 1;
        let wellknown = format!("org.freedesktop.StatusNotifierHost-{}-{}", pid, i);
        let wellknown: zbus::names::WellKnownName = wellknown
            .try_into()
            .expect("generated well-known name is invalid");

        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
        match con
            .request_name_with_flags(&wellknown, flags.into_iter().collect())
            .await?
        {
            PrimaryOwner => break wellknown,
            Exists => {}
            AlreadyOwner => {}
            InQueue => unreachable!(
                "request_name_with_flags returned InQueue even though we specified DoNotQueue"
            ),
        };
    };

    // register it to the StatusNotifierWatcher, so that they know there is a systray on the system
    snw.register_status_notifier_host(&wellknown).await?;

    Ok((wellknown, snw))
}

/// Run the host until cancelled, feeding `tray` as signals are received from
/// the StatusNotifierWatcher.
///
/// Before calling this, you should have called [`register_as_host`]. The
/// watcher's well-known name is monitored: when the watcher dies every live
/// item is disposed and removed from the tray, and when a watcher (re)appears
/// the host name is registered again and the current item list re-fetched. As
/// such this function survives watcher restarts and only returns on
/// cancellation or when the bus connection itself fails.
pub async fn run_host(
    tray: &mut dyn Tray,
    host_name: &zbus::names::WellKnownName<'static>,
    snw: &StatusNotifierWatcherProxy<'static>,
    theme: IconThemeService,
    rt: &tokio::runtime::Handle,
    cancel: CancellationToken,
) -> crate::Result<()> {
    enum WatcherEvent {
        NewItem(StatusNotifierItemRegistered),
        GoneItem(StatusNotifierItemUnregistered),
    }

    let con = snw.inner().connection();

    // start listening to these streams
    let new_items = snw.receive_status_notifier_item_registered().await?;
    let gone_items = snw.receive_status_notifier_item_unregistered().await?;

    let dbus = zbus::fdo::DBusProxy::new(con).await?;
    let mut watcher_owner_changes = dbus
        .receive_name_owner_changed_with_args(&[(0, names::WATCHER_BUS)])
        .await?;

    // live items, keyed by the watcher's id for them
    let mut items: HashMap<String, ItemProxy> = HashMap::new();

    // initial items first
    for svc in snw.registered_status_notifier_items().await? {
        add_item(tray, &mut items, con, &svc, &theme, rt).await;
    }

    let mut ev_stream = ordered_stream::join(
        OrderedStreamExt::map(new_items, WatcherEvent::NewItem),
        OrderedStreamExt::map(gone_items, WatcherEvent::GoneItem),
    );
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                for (id, item) in items.drain() {
                    item.dispose();
                    tray.on_item_removed(&id);
                }
                return Ok(());
            }
            ev = ev_stream.next() => {
                let Some(ev) = ev else {
                    // the streams only end when the connection is gone
                    return Err(crate::Error::Dbus(zbus::Error::Failure(
                        "lost connection to the session bus".to_string(),
                    )));
                };
                match ev {
                    WatcherEvent::NewItem(sig) => {
                        let svc = sig.args()?.service;
                        if items.contains_key(svc) {
                            log::debug!("got duplicate new item: {:?}", svc);
                        } else {
                            add_item(tray, &mut items, con, svc, &theme, rt).await;
                        }
                    }
                    WatcherEvent::GoneItem(sig) => {
                        let svc = sig.args()?.service;
                        if let Some(item) = items.remove(svc) {
                            item.dispose();
                            tray.on_item_removed(svc);
                        }
                    }
                }
            }
            change = watcher_owner_changes.next() => {
                let Some(change) = change else {
                    return Err(crate::Error::Dbus(zbus::Error::Failure(
                        "lost connection to the session bus".to_string(),
                    )));
                };
                let args = change.args()?;
                if args.new_owner().is_none() {
                    log::info!("StatusNotifierWatcher disappeared, dropping items");
                    for (id, item) in items.drain() {
                        item.dispose();
                        tray.on_item_removed(&id);
                    }
                } else {
                    log::info!("StatusNotifierWatcher (re)appeared, reattaching");
                    if let Err(e) = snw.register_status_notifier_host(host_name).await {
                        log::warn!("failed to re-register as host: {}", e);
                        continue;
                    }
                    match snw.registered_status_notifier_items().await {
                        Ok(svcs) => {
                            for svc in svcs {
                                if !items.contains_key(&svc) {
                                    add_item(tray, &mut items, con, &svc, &theme, rt).await;
                                }
                            }
                        }
                        Err(e) => log::warn!("failed to list items after reattach: {}", e),
                    }
                }
            }
        }
    }
}

async fn add_item(
    tray: &mut dyn Tray,
    items: &mut HashMap<String, ItemProxy>,
    con: &zbus::Connection,
    svc: &str,
    theme: &IconThemeService,
    rt: &tokio::runtime::Handle,
) {
    match ItemProxy::from_address(con, svc, theme.clone()).await {
        Ok((item, events)) => {
            item.start(rt);
            items.insert(svc.to_owned(), item.clone());
            tray.on_item_added(svc, item, events);
        }
        Err(e) => {
            log::warn!(
                "could not create StatusNotifierItem from address {:?}: {:?}",
                svc,
                e
            );
        }
    }
}
