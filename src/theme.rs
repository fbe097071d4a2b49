use std::sync::{Arc, Mutex};

/// Process-wide icon-theme search paths, shared by every item proxy.
///
/// Items may advertise an `IconThemePath`; once seen, the path stays on the
/// search list for the life of the process. There is no removal: themes a
/// live widget already resolved against must keep working after the item
/// that contributed the path is gone.
#[derive(Debug, Clone, Default)]
pub struct IconThemeService {
    paths: Arc<Mutex<Vec<String>>>,
}

impl IconThemeService {
    pub fn new() -> Self {
        Default::default()
    }

    /// Append a search path. Appending a path that is already on the list is
    /// a no-op, so signal-driven re-announcements don't grow the list.
    pub fn append_search_path(&self, path: &str) {
        if path.is_empty() {
            return;
        }
        let mut paths = self.paths.lock().unwrap(); // unwrap: mutex poisoning is okay
        if !paths.iter().any(|p| p == path) {
            log::debug!("adding icon theme search path: {}", path);
            paths.push(path.to_owned());
        }
    }

    pub fn search_paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }

    /// Look up `icon_name` in the theme, preferring `theme_path` (plus every
    /// path appended so far) over the default theme. Returns `None` when no
    /// theme knows the name, so callers can try their own fallbacks.
    ///
    /// Must be called on the GTK main context; `gtk::IconTheme` is not
    /// thread safe.
    pub fn resolve(
        &self,
        icon_name: &str,
        theme_path: Option<&str>,
        size: i32,
        scale: i32,
    ) -> Option<gtk::gdk::Paintable> {
        let theme = if let Some(path) = theme_path {
            let theme = gtk::IconTheme::new();
            theme.add_search_path(path);
            for path in self.search_paths() {
                theme.add_search_path(&path);
            }
            theme
        } else {
            let theme = gtk::IconTheme::default();
            let mut env_theme_name =
                std::env::var("GTK_THEME").unwrap_or_else(|_| "Adwaita".to_string());
            // remove the variant part of the theme name
            env_theme_name = env_theme_name
                .split_once(':')
                .map(|(pre, _post)| pre.to_string())
                .unwrap_or(env_theme_name);
            theme.set_theme_name(Some(&env_theme_name));
            for path in self.search_paths() {
                theme.add_search_path(&path);
            }
            theme
        };

        if !theme.has_icon(icon_name) {
            return None;
        }
        Some(
            theme
                .lookup_icon(
                    icon_name,
                    vec![].as_slice(),
                    size,
                    scale,
                    gtk::TextDirection::None,
                    gtk::IconLookupFlags::empty(),
                )
                .into(),
        )
    }

    /// The `image-missing` sentinel, used when an item provides nothing
    /// renderable at all.
    pub fn missing_image(&self, size: i32, scale: i32) -> gtk::gdk::Paintable {
        gtk::IconTheme::default()
            .lookup_icon(
                "image-missing",
                vec![].as_slice(),
                size,
                scale,
                gtk::TextDirection::None,
                gtk::IconLookupFlags::empty(),
            )
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_paths_are_append_only_and_deduplicated() {
        let service = IconThemeService::new();
        service.append_search_path("/usr/share/foo/icons");
        service.append_search_path("/usr/share/bar/icons");
        service.append_search_path("/usr/share/foo/icons");
        service.append_search_path("");

        assert_eq!(
            service.search_paths(),
            vec!["/usr/share/foo/icons", "/usr/share/bar/icons"]
        );
    }

    #[test]
    fn clones_share_the_same_list() {
        let service = IconThemeService::new();
        let clone = service.clone();
        clone.append_search_path("/tmp/icons");
        assert_eq!(service.search_paths(), vec!["/tmp/icons"]);
    }
}
