use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use zbus::{export::ordered_stream::OrderedStreamExt, zvariant::OwnedValue};

use crate::{
    icon::{self, IconRole, Orientation},
    menu::{MenuEvent, RemoteMenu},
    names,
    proxy::dbus_status_notifier_item::StatusNotifierItemProxy,
    theme::IconThemeService,
};

/// How long a burst of `New*` signals is coalesced before one redraw is
/// emitted.
const REDRAW_DEBOUNCE: Duration = Duration::from_millis(50);

/// Coalesces property changes into one redraw per debounce window. The first
/// change opens a window; further changes inside it are absorbed.
#[derive(Debug, Default)]
struct RedrawCoalescer {
    deadline: Option<tokio::time::Instant>,
}

impl RedrawCoalescer {
    fn note_change(&mut self) {
        self.deadline
            .get_or_insert_with(|| tokio::time::Instant::now() + REDRAW_DEBOUNCE);
    }

    /// Completes once per open window; pends forever while no change is
    /// buffered.
    async fn window_elapsed(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNotifierItemParseError;

/// Recognised values of [`org.freedesktop.StatusNotifierItem.Status`].
///
/// [`org.freedesktop.StatusNotifierItem.Status`]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/#org.freedesktop.statusnotifieritem.status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The item doesn't convey important information to the user, it can be considered an "idle"
    /// status and is likely that visualizations will chose to hide it.
    Passive,
    /// The item is active, is more important that the item will be shown in some way to the user.
    Active,
    /// The item carries really important information for the user, such as battery charge running
    /// out and is wants to incentive the direct user intervention. Visualizations should emphasize
    /// in some way the items with NeedsAttention status.
    NeedsAttention,
    /// Not part of the specification: KeePassXC and friends put
    /// "password-dialog" in the status field and expect to stay visible.
    PasswordDialog,
}

impl std::str::FromStr for Status {
    type Err = StatusNotifierItemParseError;

    fn from_str(s: &str) -> std::result::Result<Self, StatusNotifierItemParseError> {
        match s {
            "Passive" => Ok(Status::Passive),
            "Active" => Ok(Status::Active),
            "NeedsAttention" => Ok(Status::NeedsAttention),
            "password-dialog" => Ok(Status::PasswordDialog),
            _ => Err(StatusNotifierItemParseError),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Category {
    /// The item describes the status of a generic application,
    /// for instance the current state of a media player.
    ApplicationStatus,
    /// The item describes the status of communication oriented applications,
    /// like an instant messenger or an email client.
    Communications,
    /// The item describes services of the system not seen as a stand alone application by the user,
    /// such as an indicator for the activity of a disk indexing service.
    SystemServices,
    /// The item describes the state and control of a particular hardware,
    /// such as an indicator of the battery charge or sound card volume control.
    Hardware,
}

impl std::str::FromStr for Category {
    type Err = StatusNotifierItemParseError;

    fn from_str(s: &str) -> std::result::Result<Self, StatusNotifierItemParseError> {
        match s {
            "ApplicationStatus" => Ok(Category::ApplicationStatus),
            "Communications" => Ok(Category::Communications),
            "SystemServices" => Ok(Category::SystemServices),
            "Hardware" => Ok(Category::Hardware),
            _ => Err(StatusNotifierItemParseError),
        }
    }
}

/// Whether a widget for an item with this raw status should be shown.
///
/// "Passive" hides; everything else shows. "password-dialog" is singled out
/// so the rule stays true even if that misuse is someday mapped onto
/// Passive-like handling.
pub fn status_is_visible(status: &str) -> bool {
    status == "password-dialog" || status != "Passive"
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tooltip {
    pub icon_name: String,
    pub icon_pixmaps: Vec<(i32, i32, Vec<u8>)>,
    pub title: String,
    pub text: String,
}

/// The mirrored properties of one remote item.
///
/// Populated wholesale by the first `GetAll`, then patched field by field as
/// `New*` signals arrive. Concurrent fetches targeting the same snapshot are
/// not sequenced against each other; last write wins.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub id: String,
    pub category: String,
    pub status: String,
    pub title: String,
    pub window_id: i32,
    pub icon_name: String,
    pub icon_pixmaps: Vec<(i32, i32, Vec<u8>)>,
    pub overlay_icon_name: String,
    pub overlay_pixmaps: Vec<(i32, i32, Vec<u8>)>,
    pub attention_icon_name: String,
    pub attention_pixmaps: Vec<(i32, i32, Vec<u8>)>,
    pub attention_movie_name: String,
    pub tooltip: Tooltip,
    pub icon_theme_path: String,
    pub menu_path: String,
    pub item_is_menu: bool,
}

impl Snapshot {
    /// Build a snapshot from a `GetAll` response. `Id`, `Category` and
    /// `Status` must be present; anything else is optional and malformed
    /// optional values are skipped with a warning.
    pub fn from_props(mut props: HashMap<String, OwnedValue>) -> Result<Self, &'static str> {
        fn take_string(
            props: &mut HashMap<String, OwnedValue>,
            key: &str,
        ) -> Option<String> {
            let value = props.remove(key)?;
            match value.try_into() {
                Ok(s) => Some(s),
                Err(e) => {
                    log::warn!("item property {} has wrong type: {}", key, e);
                    None
                }
            }
        }
        fn take_pixmaps(
            props: &mut HashMap<String, OwnedValue>,
            key: &str,
        ) -> Vec<(i32, i32, Vec<u8>)> {
            let Some(value) = props.remove(key) else {
                return Vec::new();
            };
            match value.try_into() {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("item property {} has wrong type: {}", key, e);
                    Vec::new()
                }
            }
        }

        let mut snapshot = Snapshot {
            id: take_string(&mut props, "Id").ok_or("Id")?,
            category: take_string(&mut props, "Category").ok_or("Category")?,
            status: take_string(&mut props, "Status").ok_or("Status")?,
            ..Default::default()
        };

        snapshot.title = take_string(&mut props, "Title").unwrap_or_default();
        snapshot.icon_name = take_string(&mut props, "IconName").unwrap_or_default();
        snapshot.icon_pixmaps = take_pixmaps(&mut props, "IconPixmap");
        snapshot.overlay_icon_name = take_string(&mut props, "OverlayIconName").unwrap_or_default();
        snapshot.overlay_pixmaps = take_pixmaps(&mut props, "OverlayIconPixmap");
        snapshot.attention_icon_name =
            take_string(&mut props, "AttentionIconName").unwrap_or_default();
        snapshot.attention_pixmaps = take_pixmaps(&mut props, "AttentionIconPixmap");
        snapshot.attention_movie_name =
            take_string(&mut props, "AttentionMovieName").unwrap_or_default();
        snapshot.icon_theme_path = take_string(&mut props, "IconThemePath").unwrap_or_default();

        if let Some(value) = props.remove("WindowId") {
            match value.try_into() {
                Ok(v) => snapshot.window_id = v,
                Err(e) => log::warn!("item property WindowId has wrong type: {}", e),
            }
        }
        if let Some(value) = props.remove("ItemIsMenu") {
            match value.try_into() {
                Ok(v) => snapshot.item_is_menu = v,
                Err(e) => log::warn!("item property ItemIsMenu has wrong type: {}", e),
            }
        }
        if let Some(value) = props.remove("Menu") {
            match zbus::zvariant::OwnedObjectPath::try_from(value) {
                Ok(p) => snapshot.menu_path = p.to_string(),
                Err(e) => log::warn!("item property Menu has wrong type: {}", e),
            }
        }
        if let Some(value) = props.remove("ToolTip") {
            type RawTooltip = (String, Vec<(i32, i32, Vec<u8>)>, String, String);
            match RawTooltip::try_from(value) {
                Ok((icon_name, icon_pixmaps, title, text)) => {
                    snapshot.tooltip = Tooltip {
                        icon_name,
                        icon_pixmaps,
                        title,
                        text,
                    }
                }
                Err(e) => log::warn!("item property ToolTip has wrong type: {}", e),
            }
        }

        Ok(snapshot)
    }

    pub fn visible(&self) -> bool {
        status_is_visible(&self.status)
    }

    pub fn status(&self) -> Option<Status> {
        self.status.parse().ok()
    }

    pub fn category(&self) -> Option<Category> {
        self.category.parse().ok()
    }

    /// The menu object path, unless the item has none. `/` is the sentinel
    /// for "no menu".
    pub fn menu_path(&self) -> Option<&str> {
        if self.menu_path.is_empty() || self.menu_path == "/" {
            None
        } else {
            Some(&self.menu_path)
        }
    }
}

/// Where the item proxy is in its life. Terminal state is `Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Connecting,
    Introspecting,
    Ready,
    Updating,
    Disposed,
}

/// Events delivered to the proxy's consumer.
#[derive(Debug, Clone, Copy)]
pub enum ItemEvent {
    /// The first full property fetch landed; id/category/status are readable.
    Ready,
    /// Some property group changed; one event per debounce window.
    Redraw,
}

/// Split a watcher item id (`{bus_name}{object_path}`, e.g.
/// `:1.50/org/ayatana/NotificationItem/nm_applet`) into its two halves. A
/// bare bus name gets the default item object path.
pub fn parse_address(service: &str) -> crate::Result<(String, String)> {
    if service.is_empty() || service.starts_with('/') {
        return Err(crate::Error::Address(service.to_owned()));
    }
    match service.find('/') {
        Some(idx) => {
            let (addr, path) = service.split_at(idx);
            Ok((addr.to_owned(), path.to_owned()))
        }
        None => Ok((service.to_owned(), names::ITEM_OBJECT.to_owned())),
    }
}

#[derive(Debug)]
struct ItemShared {
    lifecycle: Mutex<Lifecycle>,
    snapshot: Mutex<Snapshot>,
    menu: Mutex<Option<RemoteMenu>>,
}

/// A local mirror of one StatusNotifierItem, fed by its `New*` signals.
///
/// Construct with [`ItemProxy::from_address`], then [`start`][Self::start]
/// the property mirror. All bus traffic runs in the background; the consumer
/// reacts to [`ItemEvent`]s and reads the [`Snapshot`].
#[derive(Debug, Clone)]
pub struct ItemProxy {
    /// The StatusNotifierItem that is wrapped by this instance.
    pub sni: StatusNotifierItemProxy<'static>,
    shared: Arc<ItemShared>,
    cancel: CancellationToken,
    theme: IconThemeService,
    events: tokio::sync::mpsc::UnboundedSender<ItemEvent>,
}

impl ItemProxy {
    /// Create an instance from the service's address, in the format used for
    /// StatusNotifierWatcher's [RegisteredStatusNotifierItems property][rsni].
    ///
    /// [rsni]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/#registeredstatusnotifieritems
    pub async fn from_address(
        con: &zbus::Connection,
        service: &str,
        theme: IconThemeService,
    ) -> crate::Result<(Self, tokio::sync::mpsc::UnboundedReceiver<ItemEvent>)> {
        let (addr, path) = parse_address(service)?;

        let sni = StatusNotifierItemProxy::builder(con)
            .destination(addr.clone())?
            .path(path)?
            // signal-triggered re-fetches must see fresh values
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;

        let (events, events_rx) = tokio::sync::mpsc::unbounded_channel();
        Ok((
            Self {
                sni,
                shared: Arc::new(ItemShared {
                    lifecycle: Mutex::new(Lifecycle::Connecting),
                    snapshot: Mutex::new(Snapshot::default()),
                    menu: Mutex::new(None),
                }),
                cancel: CancellationToken::new(),
                theme,
                events,
            },
            events_rx,
        ))
    }

    /// Fetch the initial snapshot and mirror property changes until disposed.
    pub fn start(&self, rt: &tokio::runtime::Handle) {
        rt.spawn({
            let item = self.clone();
            let cancel = self.cancel.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    () = item.run() => {}
                }
            }
        });
    }

    async fn run(&self) {
        if !self.introspect().await {
            return;
        }

        let title = self.sni.receive_new_title().await;
        let icon = self.sni.receive_new_icon().await;
        let overlay = self.sni.receive_new_overlay_icon().await;
        let attention = self.sni.receive_new_attention_icon().await;
        let tooltip = self.sni.receive_new_tool_tip().await;
        let status = self.sni.receive_new_status().await;
        let theme_path = self.sni.receive_new_icon_theme_path().await;

        let (mut title, mut icon, mut overlay, mut attention, mut tooltip, mut status, mut theme_path) =
            match (title, icon, overlay, attention, tooltip, status, theme_path) {
                (Ok(a), Ok(b), Ok(c), Ok(d), Ok(e), Ok(f), Ok(g)) => (a, b, c, d, e, f, g),
                _ => {
                    log::warn!(
                        "failed to subscribe to item signals for {}",
                        self.sni.inner().destination()
                    );
                    return;
                }
            };

        let mut redraw = RedrawCoalescer::default();

        loop {
            let mut changed = false;
            tokio::select! {
                () = redraw.window_elapsed() => {
                    let _ = self.events.send(ItemEvent::Redraw);
                }
                sig = title.next() => {
                    if sig.is_none() { break }
                    changed = self.refetch_title().await;
                }
                sig = icon.next() => {
                    if sig.is_none() { break }
                    changed = self.refetch_icon().await;
                }
                sig = overlay.next() => {
                    if sig.is_none() { break }
                    changed = self.refetch_overlay_icon().await;
                }
                sig = attention.next() => {
                    if sig.is_none() { break }
                    changed = self.refetch_attention_icon().await;
                }
                sig = tooltip.next() => {
                    if sig.is_none() { break }
                    changed = self.refetch_tooltip().await;
                }
                sig = status.next() => {
                    let Some(sig) = sig else { break };
                    // the new value rides along in the signal, no re-fetch
                    if let Ok(args) = sig.args() {
                        self.with_snapshot(|s| s.status = args.status.to_owned());
                        changed = true;
                    }
                }
                sig = theme_path.next() => {
                    let Some(sig) = sig else { break };
                    if let Ok(args) = sig.args() {
                        let path = args.icon_theme_path.to_owned();
                        self.theme.append_search_path(&path);
                        self.with_snapshot(|s| s.icon_theme_path = path);
                        changed = true;
                    }
                }
            }
            if changed {
                redraw.note_change();
            }
        }
    }

    /// One `GetAll`, parsed into the snapshot. Returns false when the item
    /// never becomes ready; per protocol etiquette that is only worth a
    /// warning, not an error surfaced to the host.
    async fn introspect(&self) -> bool {
        self.set_lifecycle(Lifecycle::Introspecting);

        let props = async {
            zbus::fdo::PropertiesProxy::builder(self.sni.inner().connection())
                .destination(self.sni.inner().destination().to_owned())?
                .path(self.sni.inner().path().to_owned())?
                .build()
                .await
        };
        let props = match props.await {
            Ok(p) => p,
            Err(e) => {
                log::warn!("failed to open properties proxy: {}", e);
                return false;
            }
        };

        let interface = zbus::names::InterfaceName::from_static_str_unchecked(
            "org.kde.StatusNotifierItem",
        );
        let all = match props.get_all(zbus::zvariant::Optional::from(Some(interface))).await {
            Ok(all) => all,
            Err(e) => {
                log::warn!(
                    "failed to fetch properties of {}: {}",
                    self.sni.inner().destination(),
                    e
                );
                return false;
            }
        };

        match Snapshot::from_props(all) {
            Ok(snapshot) => {
                if !snapshot.icon_theme_path.is_empty() {
                    self.theme.append_search_path(&snapshot.icon_theme_path);
                }
                *self.shared.snapshot.lock().unwrap() = snapshot;
                self.set_lifecycle(Lifecycle::Ready);
                let _ = self.events.send(ItemEvent::Ready);
                true
            }
            Err(missing) => {
                log::warn!(
                    "item {} is missing required property {}, dropping it",
                    self.sni.inner().destination(),
                    missing
                );
                false
            }
        }
    }

    fn with_snapshot<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut snapshot = self.shared.snapshot.lock().unwrap(); // unwrap: mutex poisoning is okay
        f(&mut snapshot)
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        *self.shared.lifecycle.lock().unwrap() = lifecycle;
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.shared.lifecycle.lock().unwrap()
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshot.lock().unwrap().clone()
    }

    // Minimal per-signal re-fetches. Only the affected property group is
    // read back; a fetch failure keeps the last good value.

    async fn refetch_title(&self) -> bool {
        self.set_lifecycle(Lifecycle::Updating);
        let ok = match self.sni.title().await {
            Ok(title) => {
                self.with_snapshot(|s| s.title = title);
                true
            }
            Err(e) => {
                log::warn!("failed to re-fetch Title: {}", e);
                false
            }
        };
        self.set_lifecycle(Lifecycle::Ready);
        ok
    }

    async fn refetch_icon(&self) -> bool {
        self.set_lifecycle(Lifecycle::Updating);
        let name = self.sni.icon_name().await;
        let pixmaps = self.sni.icon_pixmap().await;
        let ok = match (name, pixmaps) {
            (Ok(name), Ok(pixmaps)) => {
                self.with_snapshot(|s| {
                    s.icon_name = name;
                    s.icon_pixmaps = pixmaps;
                });
                true
            }
            (name, pixmaps) => {
                warn_refetch("Icon", name.err().or(pixmaps.err()));
                false
            }
        };
        self.set_lifecycle(Lifecycle::Ready);
        ok
    }

    async fn refetch_overlay_icon(&self) -> bool {
        self.set_lifecycle(Lifecycle::Updating);
        let name = self.sni.overlay_icon_name().await;
        let pixmaps = self.sni.overlay_icon_pixmap().await;
        let ok = match (name, pixmaps) {
            (Ok(name), Ok(pixmaps)) => {
                self.with_snapshot(|s| {
                    s.overlay_icon_name = name;
                    s.overlay_pixmaps = pixmaps;
                });
                true
            }
            (name, pixmaps) => {
                warn_refetch("OverlayIcon", name.err().or(pixmaps.err()));
                false
            }
        };
        self.set_lifecycle(Lifecycle::Ready);
        ok
    }

    async fn refetch_attention_icon(&self) -> bool {
        self.set_lifecycle(Lifecycle::Updating);
        let name = self.sni.attention_icon_name().await;
        let pixmaps = self.sni.attention_icon_pixmap().await;
        let movie = self.sni.attention_movie_name().await;
        let ok = match (name, pixmaps) {
            (Ok(name), Ok(pixmaps)) => {
                self.with_snapshot(|s| {
                    s.attention_icon_name = name;
                    s.attention_pixmaps = pixmaps;
                    if let Ok(movie) = movie {
                        s.attention_movie_name = movie;
                    }
                });
                true
            }
            (name, pixmaps) => {
                warn_refetch("AttentionIcon", name.err().or(pixmaps.err()));
                false
            }
        };
        self.set_lifecycle(Lifecycle::Ready);
        ok
    }

    async fn refetch_tooltip(&self) -> bool {
        self.set_lifecycle(Lifecycle::Updating);
        let ok = match self.sni.tool_tip().await {
            Ok((icon_name, icon_pixmaps, title, text)) => {
                self.with_snapshot(|s| {
                    s.tooltip = Tooltip {
                        icon_name,
                        icon_pixmaps,
                        title,
                        text,
                    }
                });
                true
            }
            Err(e) => {
                log::warn!("failed to re-fetch ToolTip: {}", e);
                false
            }
        };
        self.set_lifecycle(Lifecycle::Ready);
        ok
    }

    /// Resolve one icon role from the snapshot. Must be called on the GTK
    /// main context.
    pub fn icon(
        &self,
        role: IconRole,
        size: i32,
        scale: i32,
        orientation: Orientation,
    ) -> Option<gtk::gdk::Paintable> {
        let snapshot = self.snapshot();
        let (name, pixmaps) = match role {
            IconRole::Icon => (&snapshot.icon_name, &snapshot.icon_pixmaps),
            IconRole::OverlayIcon => (&snapshot.overlay_icon_name, &snapshot.overlay_pixmaps),
            IconRole::AttentionIcon => {
                (&snapshot.attention_icon_name, &snapshot.attention_pixmaps)
            }
        };
        let theme_path = if snapshot.icon_theme_path.is_empty() {
            None
        } else {
            Some(snapshot.icon_theme_path.as_str())
        };
        icon::load_icon(
            role, name, pixmaps, theme_path, &self.theme, size, scale, orientation,
        )
    }

    /// Open (and once created, reuse) the item's remote menu. `None` when
    /// the item advertises no menu.
    pub async fn remote_menu(
        &self,
        rt: &tokio::runtime::Handle,
    ) -> crate::Result<
        Option<(
            RemoteMenu,
            Option<tokio::sync::mpsc::UnboundedReceiver<MenuEvent>>,
        )>,
    > {
        if let Some(menu) = self.shared.menu.lock().unwrap().clone() {
            return Ok(Some((menu, None)));
        }
        let snapshot = self.snapshot();
        let Some(path) = snapshot.menu_path() else {
            return Ok(None);
        };
        let path = zbus::zvariant::OwnedObjectPath::try_from(path.to_owned())
            .map_err(|_| crate::Error::Address(path.to_owned()))?;
        let (menu, events_rx) = RemoteMenu::from_address(
            self.sni.inner().connection(),
            self.sni.inner().destination().as_str(),
            path,
        )
        .await?;
        menu.start(rt);
        *self.shared.menu.lock().unwrap() = Some(menu.clone());
        Ok(Some((menu, Some(events_rx))))
    }

    /// Cancel everything belonging to this item: in-flight fetches, signal
    /// loops and the remote menu. Decoded pixmaps are released with the
    /// snapshot.
    pub fn dispose(&self) {
        self.set_lifecycle(Lifecycle::Disposed);
        self.cancel.cancel();
        if let Some(menu) = self.shared.menu.lock().unwrap().take() {
            menu.dispose();
        }
        self.with_snapshot(|s| *s = Snapshot::default());
    }

    // Methods forwarded to the remote item.

    pub async fn activate(&self, x: i32, y: i32) -> zbus::Result<()> {
        self.sni.activate(x, y).await
    }

    pub async fn secondary_activate(&self, x: i32, y: i32) -> zbus::Result<()> {
        self.sni.secondary_activate(x, y).await
    }

    pub async fn context_menu(&self, x: i32, y: i32) -> zbus::Result<()> {
        self.sni.context_menu(x, y).await
    }

    pub async fn scroll(&self, delta: i32, orientation: Orientation) -> zbus::Result<()> {
        self.sni.scroll(delta, scroll_direction(orientation)).await
    }
}

fn warn_refetch(group: &str, err: Option<zbus::Error>) {
    if let Some(e) = err {
        log::warn!("failed to re-fetch {} properties: {}", group, e);
    }
}

/// The wire spells these capitalized.
fn scroll_direction(orientation: Orientation) -> &'static str {
    match orientation {
        Orientation::Horizontal => "Horizontal",
        Orientation::Vertical => "Vertical",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::zvariant::{StructureBuilder, Value};

    fn owned(value: Value<'_>) -> OwnedValue {
        OwnedValue::try_from(value).unwrap()
    }

    fn base_props() -> HashMap<String, OwnedValue> {
        let mut props = HashMap::new();
        props.insert("Id".to_string(), owned(Value::from("nm-applet")));
        props.insert(
            "Category".to_string(),
            owned(Value::from("ApplicationStatus")),
        );
        props.insert("Status".to_string(), owned(Value::from("Active")));
        props
    }

    #[test]
    fn address_with_path_splits_verbatim() {
        let (addr, path) = parse_address(":1.50/org/ayatana/NotificationItem/nm_applet").unwrap();
        assert_eq!(addr, ":1.50");
        assert_eq!(path, "/org/ayatana/NotificationItem/nm_applet");
    }

    #[test]
    fn pathless_address_gets_default_object() {
        let (addr, path) = parse_address(":1.50").unwrap();
        assert_eq!(addr, ":1.50");
        assert_eq!(path, "/StatusNotifierItem");

        let (addr, path) = parse_address("org.kde.StatusNotifierItem-4077-1").unwrap();
        assert_eq!(addr, "org.kde.StatusNotifierItem-4077-1");
        assert_eq!(path, "/StatusNotifierItem");
    }

    #[test]
    fn bare_object_path_is_not_an_address() {
        assert!(parse_address("/StatusNotifierItem").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn snapshot_requires_id_category_status() {
        for missing in ["Id", "Category", "Status"] {
            let mut props = base_props();
            props.remove(missing);
            assert_eq!(Snapshot::from_props(props).err(), Some(missing));
        }
    }

    #[test]
    fn snapshot_parses_optional_fields() {
        let mut props = base_props();
        props.insert("Title".to_string(), owned(Value::from("Network")));
        props.insert("IconName".to_string(), owned(Value::from("nm-signal-75")));
        props.insert(
            "Menu".to_string(),
            owned(Value::from(
                zbus::zvariant::ObjectPath::try_from("/MenuBar").unwrap(),
            )),
        );
        props.insert("ItemIsMenu".to_string(), owned(Value::from(true)));
        let tooltip = StructureBuilder::new()
            .add_field("".to_string())
            .add_field(Vec::<(i32, i32, Vec<u8>)>::new())
            .add_field("Network".to_string())
            .add_field("Connected".to_string())
            .build();
        props.insert("ToolTip".to_string(), owned(Value::Structure(tooltip)));

        let snapshot = Snapshot::from_props(props).unwrap();
        assert_eq!(snapshot.title, "Network");
        assert_eq!(snapshot.icon_name, "nm-signal-75");
        assert_eq!(snapshot.menu_path(), Some("/MenuBar"));
        assert!(snapshot.item_is_menu);
        assert_eq!(snapshot.tooltip.title, "Network");
        assert_eq!(snapshot.tooltip.text, "Connected");
    }

    #[test]
    fn malformed_optional_property_is_skipped() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut props = base_props();
        // ToolTip with a plain string where a struct belongs
        props.insert("ToolTip".to_string(), owned(Value::from("nope")));
        let snapshot = Snapshot::from_props(props).unwrap();
        assert_eq!(snapshot.tooltip, Tooltip::default());
    }

    #[test]
    fn root_sentinel_means_no_menu() {
        let mut props = base_props();
        props.insert(
            "Menu".to_string(),
            owned(Value::from(
                zbus::zvariant::ObjectPath::try_from("/").unwrap(),
            )),
        );
        let snapshot = Snapshot::from_props(props).unwrap();
        assert_eq!(snapshot.menu_path(), None);
    }

    #[test]
    fn passive_hides_password_dialog_never_does() {
        assert!(!status_is_visible("Passive"));
        assert!(status_is_visible("Active"));
        assert!(status_is_visible("NeedsAttention"));
        assert!(status_is_visible("password-dialog"));
        // unknown statuses stay visible
        assert!(status_is_visible("SomethingNew"));
    }

    #[test]
    fn status_parse_accepts_known_values() {
        assert_eq!("Passive".parse(), Ok(Status::Passive));
        assert_eq!("password-dialog".parse(), Ok(Status::PasswordDialog));
        assert!("".parse::<Status>().is_err());
    }

    #[test]
    fn scroll_direction_is_capitalized_on_the_wire() {
        assert_eq!(scroll_direction(Orientation::Horizontal), "Horizontal");
        assert_eq!(scroll_direction(Orientation::Vertical), "Vertical");
    }

    #[tokio::test(start_paused = true)]
    async fn change_burst_coalesces_into_one_redraw_window() {
        let mut redraw = RedrawCoalescer::default();
        redraw.note_change();
        redraw.note_change();
        redraw.note_change();

        // the whole burst resolves into a single window
        let opened = tokio::time::Instant::now();
        redraw.window_elapsed().await;
        assert_eq!(opened.elapsed(), REDRAW_DEBOUNCE);

        // the burst is spent; nothing fires until the next change
        let idle = tokio::time::timeout(REDRAW_DEBOUNCE * 4, redraw.window_elapsed()).await;
        assert!(idle.is_err());

        redraw.note_change();
        let again = tokio::time::timeout(REDRAW_DEBOUNCE * 4, redraw.window_elapsed()).await;
        assert!(again.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn changes_inside_a_window_do_not_extend_it() {
        let mut redraw = RedrawCoalescer::default();
        redraw.note_change();
        let opened = tokio::time::Instant::now();

        tokio::time::advance(REDRAW_DEBOUNCE / 2).await;
        redraw.note_change();

        redraw.window_elapsed().await;
        assert_eq!(opened.elapsed(), REDRAW_DEBOUNCE);
    }
}
