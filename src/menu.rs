use std::{
    fmt::Display,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio_util::sync::CancellationToken;
use zbus::{export::ordered_stream::OrderedStreamExt, zvariant::OwnedValue, zvariant::Value};

use crate::{
    layout::{LayoutParseError, MenuTree, RawNode, ROOT_ID},
    proxy::dbus_menu::DbusMenuProxy,
};

#[derive(Debug, Clone, Copy)]
pub enum Status {
    Normal,
    Notice,
}

impl std::str::FromStr for Status {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "normal" => Ok(Status::Normal),
            "notice" => Ok(Status::Notice),
            _ => Err(()),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Normal => write!(f, "normal"),
            Status::Notice => write!(f, "notice"),
        }
    }
}

/// Interaction notifications sent to the menu server.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    Clicked,
    Hovered,
    Opened,
    Closed,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Clicked => write!(f, "clicked"),
            Event::Hovered => write!(f, "hovered"),
            Event::Opened => write!(f, "opened"),
            Event::Closed => write!(f, "closed"),
        }
    }
}

/// Tree-change notifications delivered to the consumer.
#[derive(Debug, Clone, Copy)]
pub enum MenuEvent {
    /// The mirrored tree changed; re-read it through [`RemoteMenu::with_tree`].
    Refreshed,
    /// The server asks for the item at `id` to be activated.
    ActivationRequested { id: i32, timestamp: u32 },
}

/// A mirror of one remote `com.canonical.dbusmenu` tree.
///
/// Owned by the item proxy that advertised it; disposing the owner cancels
/// every in-flight call and stops the signal tasks.
#[derive(Debug, Clone)]
pub struct RemoteMenu {
    /// The dbusmenu server that is wrapped by this instance.
    pub dm: DbusMenuProxy<'static>,
    tree: Arc<Mutex<MenuTree>>,
    cancel: CancellationToken,
    events: tokio::sync::mpsc::UnboundedSender<MenuEvent>,
}

impl RemoteMenu {
    /// Create an instance from the item's bus name and its `Menu` property.
    pub async fn from_address(
        con: &zbus::Connection,
        destination: &str,
        object_path: zbus::zvariant::OwnedObjectPath,
    ) -> zbus::Result<(Self, tokio::sync::mpsc::UnboundedReceiver<MenuEvent>)> {
        let dm = DbusMenuProxy::builder(con)
            .destination(destination.to_owned())?
            .path(object_path)?
            .build()
            .await?;
        let (events, events_rx) = tokio::sync::mpsc::unbounded_channel();
        Ok((
            Self {
                dm,
                tree: Arc::new(Mutex::new(MenuTree::new())),
                cancel: CancellationToken::new(),
                events,
            },
            events_rx,
        ))
    }

    /// Run the initial layout fetch and the signal loops in the background.
    pub fn start(&self, rt: &tokio::runtime::Handle) {
        rt.spawn({
            let menu = self.clone();
            async move {
                tokio::select! {
                    _ = menu.cancel.cancelled() => {}
                    () = menu.run() => {}
                }
            }
        });
    }

    async fn run(&self) {
        if let Err(e) = self.refresh(ROOT_ID).await {
            log::warn!("initial menu layout fetch failed: {}", e);
        }

        let layout_updated = self.dm.receive_layout_updated().await;
        let props_updated = self.dm.receive_items_properties_updated().await;
        let activation = self.dm.receive_item_activation_requested().await;

        let (mut layout_updated, mut props_updated, mut activation) =
            match (layout_updated, props_updated, activation) {
                (Ok(l), Ok(p), Ok(a)) => (l, p, a),
                _ => {
                    log::warn!("failed to subscribe to dbusmenu signals");
                    return;
                }
            };

        loop {
            tokio::select! {
                sig = layout_updated.next() => {
                    let Some(sig) = sig else { break };
                    let parent = match sig.args() {
                        Ok(args) => args.parent,
                        Err(e) => {
                            log::warn!("malformed LayoutUpdated: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = self.refresh(parent).await {
                        log::warn!("failed to refresh menu layout: {}", e);
                    }
                }
                sig = props_updated.next() => {
                    let Some(sig) = sig else { break };
                    match sig.args() {
                        Ok(args) => self.apply_property_updates(
                            &args.updated_props,
                            &args.removed_props,
                        ),
                        Err(e) => log::warn!("malformed ItemsPropertiesUpdated: {}", e),
                    }
                }
                sig = activation.next() => {
                    let Some(sig) = sig else { break };
                    if let Ok(args) = sig.args() {
                        let _ = self.events.send(MenuEvent::ActivationRequested {
                            id: args.id,
                            timestamp: args.timestamp,
                        });
                    }
                }
            }
        }
    }

    /// Fetch the full layout under `parent_id` and merge it into the local
    /// tree. Stale nodes under that parent are dropped.
    pub async fn refresh(&self, parent_id: i32) -> crate::Result<()> {
        let (revision, raw) = self.dm.get_layout(parent_id, -1, &[]).await?;
        match merge_layout(&self.tree, &self.cancel, parent_id, revision, raw) {
            Ok(true) => {
                let _ = self.events.send(MenuEvent::Refreshed);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                log::warn!("malformed GetLayout response: {}", e);
                Err(crate::Error::Layout(e.to_string()))
            }
        }
    }

    fn apply_property_updates(
        &self,
        updated: &[(i32, std::collections::HashMap<&str, Value<'_>>)],
        removed: &[(i32, Vec<&str>)],
    ) {
        let mut changed = false;
        {
            let mut tree = self.tree.lock().unwrap(); // unwrap: mutex poisoning is okay
            for (id, props) in updated {
                let mut owned_props = Vec::with_capacity(props.len());
                for (key, value) in props {
                    match OwnedValue::try_from(value) {
                        Ok(v) => owned_props.push((key.to_string(), v)),
                        Err(e) => log::warn!("unreadable menu property {:?}: {}", key, e),
                    }
                }
                match tree.patch_properties(*id, owned_props) {
                    Ok(did_patch) => changed |= did_patch,
                    Err(e) => log::warn!("invalid menu property update: {}", e),
                }
            }
            for (id, keys) in removed {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                changed |= tree.clear_properties(*id, &keys);
            }
        }
        if changed {
            let _ = self.events.send(MenuEvent::Refreshed);
        }
    }

    /// Read the mirrored tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&MenuTree) -> R) -> R {
        let tree = self.tree.lock().unwrap(); // unwrap: mutex poisoning is okay
        f(&tree)
    }

    /// Cancel every outstanding call belonging to this menu.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    // Properties

    pub async fn version(&self) -> zbus::Result<u32> {
        self.dm.version().await
    }

    pub async fn status(&self) -> zbus::Result<Status> {
        let status = self.dm.status().await?;
        match status.parse() {
            Ok(s) => Ok(s),
            Err(_) => Err(zbus::Error::Failure(format!("Invalid status {:?}", status))),
        }
    }

    pub async fn icon_theme_path(&self) -> zbus::Result<Vec<String>> {
        self.dm.icon_theme_path().await
    }

    // Interaction

    pub async fn event(&self, id: i32, event: Event, data: Option<&Value<'_>>) -> zbus::Result<()> {
        self.dm
            .event(
                id,
                &event.to_string(),
                data.unwrap_or(&Value::I32(0)),
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO)
                    .as_millis() as u32,
            )
            .await
    }

    /// Send the activation click for a menu entry.
    pub async fn activate(&self, id: i32) -> zbus::Result<()> {
        self.event(id, Event::Clicked, None).await
    }

    pub async fn hover(&self, id: i32) -> zbus::Result<()> {
        self.event(id, Event::Hovered, None).await
    }

    pub async fn about_to_show(&self, id: i32) -> zbus::Result<bool> {
        self.dm.about_to_show(id).await
    }

    /// To be called right before the menu is shown: notifies the server and,
    /// if it claims an update is pending, pulls one more full layout. The
    /// `AboutToShow` round trip is awaited in full so it is ordered before
    /// the menu appears on screen.
    pub async fn open(&self) -> zbus::Result<()> {
        self.event(ROOT_ID, Event::Opened, None).await?;
        if self.about_to_show(ROOT_ID).await? {
            if let Err(e) = self.refresh(ROOT_ID).await {
                log::warn!("about-to-show refresh failed: {}", e);
            }
        }
        Ok(())
    }

    /// To be called when the menu is dismissed.
    pub async fn close(&self) -> zbus::Result<()> {
        self.event(ROOT_ID, Event::Closed, None).await
    }
}

/// Merge a fetched layout into the shared tree. `Ok(false)` means the
/// response was discarded: the menu was disposed while the call was in
/// flight, or the parent is not part of the local tree.
fn merge_layout(
    tree: &Mutex<MenuTree>,
    cancel: &CancellationToken,
    parent_id: i32,
    revision: u32,
    raw: RawNode,
) -> Result<bool, LayoutParseError> {
    if cancel.is_cancelled() {
        return Ok(false);
    }
    let mut tree = tree.lock().unwrap(); // unwrap: mutex poisoning is okay
    tree.apply_layout(parent_id, revision, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_root() -> RawNode {
        (ROOT_ID, HashMap::new(), Vec::new())
    }

    #[test]
    fn live_menu_applies_fetched_layouts() {
        let tree = Mutex::new(MenuTree::new());
        let cancel = CancellationToken::new();

        assert_eq!(merge_layout(&tree, &cancel, ROOT_ID, 5, empty_root()), Ok(true));
        assert_eq!(tree.lock().unwrap().revision(), 5);
    }

    #[test]
    fn layout_arriving_after_dispose_is_discarded() {
        let tree = Mutex::new(MenuTree::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(merge_layout(&tree, &cancel, ROOT_ID, 5, empty_root()), Ok(false));
        // the tree was not touched
        assert_eq!(tree.lock().unwrap().revision(), 0);
    }
}
