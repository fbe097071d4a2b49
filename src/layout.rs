use std::collections::{HashMap, HashSet};
use std::error::Error;

use zbus::zvariant::OwnedValue;

/// The implicit root of every dbusmenu tree. It anchors the top-level
/// entries and is never itself rendered.
pub const ROOT_ID: i32 = 0;

/// Raw `GetLayout` payload for one node: `(id, properties, children)`, with
/// children as variant-wrapped nodes of the same shape.
pub type RawNode = (i32, HashMap<String, OwnedValue>, Vec<OwnedValue>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeProperty {
    Standard,
    Separator,
    Vendor(String),
}

impl From<&str> for TypeProperty {
    fn from(s: &str) -> Self {
        match s {
            "standard" => TypeProperty::Standard,
            "separator" => TypeProperty::Separator,
            _ => TypeProperty::Vendor(s.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToggleProperty {
    #[default]
    None,
    Checkmark,
    Radio,
}

impl From<&str> for ToggleProperty {
    fn from(s: &str) -> Self {
        match s {
            "checkmark" => ToggleProperty::Checkmark,
            "radio" => ToggleProperty::Radio,
            _ => ToggleProperty::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutParseError {
    InvalidType(String),
}

impl LayoutParseError {
    pub fn invalid_type(prop: &str, err: impl Error) -> Self {
        LayoutParseError::InvalidType(format!("prop: {}, err: {:?}", prop, err))
    }
}

impl std::fmt::Display for LayoutParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutParseError::InvalidType(msg) => write!(f, "invalid type: {}", msg),
        }
    }
}

pub const LAYOUT_PROP_TYPE: &str = "type";
pub const LAYOUT_PROP_LABEL: &str = "label";
pub const LAYOUT_PROP_ENABLED: &str = "enabled";
pub const LAYOUT_PROP_VISIBLE: &str = "visible";
pub const LAYOUT_PROP_ICON_NAME: &str = "icon-name";
pub const LAYOUT_PROP_ICON_DATA: &str = "icon-data";
pub const LAYOUT_PROP_SHORTCUT: &str = "shortcut";
pub const LAYOUT_PROP_TOGGLE_TYPE: &str = "toggle-type";
pub const LAYOUT_PROP_TOGGLE_STATE: &str = "toggle-state";
pub const LAYOUT_PROP_CHILDREN_DISPLAY: &str = "children-display";

#[derive(Debug)]
pub enum LayoutProperty {
    Type(TypeProperty),
    Label(String),
    Enabled(bool),
    Visible(bool),
    IconName(String),
    /// Raw PNG bytes; decoding to a texture is the renderer's job.
    IconData(Vec<u8>),
    Shortcut(Vec<Vec<String>>),
    ToggleType(ToggleProperty),
    ToggleState(bool),
    ChildrenDisplay(bool),
    Vendor(OwnedValue),
}

impl Clone for LayoutProperty {
    fn clone(&self) -> Self {
        match self {
            Self::Type(arg0) => Self::Type(arg0.clone()),
            Self::Label(arg0) => Self::Label(arg0.clone()),
            Self::Enabled(arg0) => Self::Enabled(*arg0),
            Self::Visible(arg0) => Self::Visible(*arg0),
            Self::IconName(arg0) => Self::IconName(arg0.clone()),
            Self::IconData(arg0) => Self::IconData(arg0.clone()),
            Self::Shortcut(arg0) => Self::Shortcut(arg0.clone()),
            Self::ToggleType(arg0) => Self::ToggleType(*arg0),
            Self::ToggleState(arg0) => Self::ToggleState(*arg0),
            Self::ChildrenDisplay(arg0) => Self::ChildrenDisplay(*arg0),
            Self::Vendor(arg0) => match arg0.try_clone() {
                Ok(value) => Self::Vendor(value),
                Err(e) => {
                    // only values carrying file descriptors can fail here
                    log::warn!("vendor menu property is not clonable: {}", e);
                    Self::Vendor(OwnedValue::from(0u8))
                }
            },
        }
    }
}

impl TryFrom<(&str, OwnedValue)> for LayoutProperty {
    type Error = LayoutParseError;

    fn try_from(value: (&str, OwnedValue)) -> Result<Self, Self::Error> {
        let (key, value) = value;
        match key {
            LAYOUT_PROP_TYPE => {
                let value_str: String = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_TYPE, err))?;
                let type_ = TypeProperty::from(value_str.as_str());
                Ok(LayoutProperty::Type(type_))
            }
            LAYOUT_PROP_LABEL => {
                let value_str: String = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_LABEL, err))?;
                Ok(LayoutProperty::Label(value_str))
            }
            LAYOUT_PROP_ENABLED => {
                let value_bool: bool = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_ENABLED, err))?;
                Ok(LayoutProperty::Enabled(value_bool))
            }
            LAYOUT_PROP_VISIBLE => {
                let value_bool: bool = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_VISIBLE, err))?;
                Ok(LayoutProperty::Visible(value_bool))
            }
            LAYOUT_PROP_ICON_NAME => {
                let value_str: String = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_ICON_NAME, err))?;
                Ok(LayoutProperty::IconName(value_str))
            }
            LAYOUT_PROP_ICON_DATA => {
                let value_vec: Vec<u8> = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_ICON_DATA, err))?;
                Ok(LayoutProperty::IconData(value_vec))
            }
            LAYOUT_PROP_SHORTCUT => {
                let value_vec: Vec<Vec<String>> = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_SHORTCUT, err))?;
                Ok(LayoutProperty::Shortcut(value_vec))
            }
            LAYOUT_PROP_TOGGLE_TYPE => {
                let value_str: String = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_TOGGLE_TYPE, err))?;
                let toggle_type = ToggleProperty::from(value_str.as_str());
                Ok(LayoutProperty::ToggleType(toggle_type))
            }
            LAYOUT_PROP_TOGGLE_STATE => {
                let value_int: i32 = value
                    .try_into()
                    .map_err(|err| LayoutParseError::invalid_type(LAYOUT_PROP_TOGGLE_STATE, err))?;
                match value_int {
                    1 => Ok(LayoutProperty::ToggleState(true)),
                    _ => Ok(LayoutProperty::ToggleState(false)),
                }
            }
            LAYOUT_PROP_CHILDREN_DISPLAY => {
                let value_str: String = value.try_into().map_err(|err| {
                    LayoutParseError::invalid_type(LAYOUT_PROP_CHILDREN_DISPLAY, err)
                })?;
                match value_str.as_str() {
                    "submenu" => Ok(LayoutProperty::ChildrenDisplay(true)),
                    _ => Ok(LayoutProperty::ChildrenDisplay(false)),
                }
            }
            _ => Ok(LayoutProperty::Vendor(value)),
        }
    }
}

/// A fully parsed `GetLayout` subtree, before it is merged into a
/// [`MenuTree`]. Parsing everything first means a malformed response leaves
/// the cached tree untouched.
#[derive(Debug, Clone, Default)]
struct ParsedNode {
    id: i32,
    properties: HashMap<String, LayoutProperty>,
    children: Vec<ParsedNode>,
}

impl TryFrom<RawNode> for ParsedNode {
    type Error = LayoutParseError;

    fn try_from(value: RawNode) -> Result<Self, Self::Error> {
        let (id, properties, children) = value;

        let mut properties_map = HashMap::new();
        for (key, value) in properties {
            let parsed_value = LayoutProperty::try_from((key.as_str(), value))?;
            properties_map.insert(key, parsed_value);
        }

        let mut children_vec = Vec::new();
        for child_value in children {
            let child: RawNode = child_value
                .try_into()
                .map_err(|err| LayoutParseError::invalid_type("child", err))?;
            let child = ParsedNode::try_from(child)?;
            children_vec.push(child);
        }

        Ok(ParsedNode {
            id,
            properties: properties_map,
            children: children_vec,
        })
    }
}

/// One materialized menu entry. Children are held as an ordered id list into
/// the owning [`MenuTree`].
#[derive(Debug, Clone, Default)]
pub struct MenuNode {
    pub id: i32,
    pub properties: HashMap<String, LayoutProperty>,
    pub children: Vec<i32>,
}

impl MenuNode {
    pub fn label(&self) -> Option<&str> {
        match self.properties.get(LAYOUT_PROP_LABEL) {
            Some(LayoutProperty::Label(s)) => Some(s),
            _ => None,
        }
    }
}

/// The local mirror of one remote dbusmenu tree.
///
/// `GetLayout` responses rebuild whole subtrees (stale nodes are dropped),
/// while `ItemsPropertiesUpdated` patches are strictly incremental and never
/// create nodes. Both behaviors match what dbusmenu servers expect.
#[derive(Debug, Clone)]
pub struct MenuTree {
    revision: u32,
    nodes: HashMap<i32, MenuNode>,
}

impl Default for MenuTree {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID,
            MenuNode {
                id: ROOT_ID,
                ..Default::default()
            },
        );
        Self { revision: 0, nodes }
    }
}

impl MenuTree {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn node(&self, id: i32) -> Option<&MenuNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // the root anchor alone counts as empty
        self.nodes.len() <= 1
    }

    /// The ordered children of `id`. For [`ROOT_ID`] these are the top-level
    /// menu entries; the root itself is never one of them.
    pub fn children_of(&self, id: i32) -> Vec<&MenuNode> {
        match self.nodes.get(&id) {
            Some(node) => node
                .children
                .iter()
                .filter_map(|child| self.nodes.get(child))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Merge a `GetLayout` response for `parent_id` into the tree.
    ///
    /// Nodes already present are patched in place, new ones are created, and
    /// nodes of the previous subtree that the response no longer mentions
    /// are dropped. On parse failure the tree is left unchanged.
    ///
    /// `Ok(false)` means the response was discarded: a layout for a parent
    /// the tree never materialized would be unreachable from the root and
    /// could never be dropped again.
    pub fn apply_layout(
        &mut self,
        parent_id: i32,
        revision: u32,
        raw: RawNode,
    ) -> Result<bool, LayoutParseError> {
        if !self.nodes.contains_key(&parent_id) {
            return Ok(false);
        }
        let parsed = ParsedNode::try_from(raw)?;

        let stale = self.subtree_ids(parent_id);
        let mut visited = HashSet::new();
        self.merge(&parsed, &mut visited);

        for id in stale {
            if !visited.contains(&id) {
                self.nodes.remove(&id);
            }
        }
        self.revision = revision;
        Ok(true)
    }

    fn merge(&mut self, parsed: &ParsedNode, visited: &mut HashSet<i32>) {
        visited.insert(parsed.id);

        let node = self.nodes.entry(parsed.id).or_insert_with(|| MenuNode {
            id: parsed.id,
            ..Default::default()
        });
        // in-place property patch, never a replacement
        for (key, value) in &parsed.properties {
            node.properties.insert(key.clone(), value.clone());
        }
        node.children = parsed.children.iter().map(|c| c.id).collect();

        for child in &parsed.children {
            self.merge(child, visited);
        }
    }

    /// Every id reachable from `parent_id`, the parent included.
    fn subtree_ids(&self, parent_id: i32) -> HashSet<i32> {
        let mut ids = HashSet::new();
        let mut stack = vec![parent_id];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                if ids.insert(id) {
                    stack.extend(node.children.iter().copied());
                }
            }
        }
        // the root anchor always survives a refresh
        ids.remove(&ROOT_ID);
        ids
    }

    /// Patch properties on an existing node. Unknown ids are a no-op: the
    /// incremental path never creates nodes.
    pub fn patch_properties<I>(&mut self, id: i32, props: I) -> Result<bool, LayoutParseError>
    where
        I: IntoIterator<Item = (String, OwnedValue)>,
    {
        let node = match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => return Ok(false),
        };
        for (key, value) in props {
            let parsed_value = LayoutProperty::try_from((key.as_str(), value))?;
            node.properties.insert(key, parsed_value);
        }
        Ok(true)
    }

    /// Clear exactly the named property keys on an existing node. Unknown
    /// ids are a no-op.
    pub fn clear_properties(&mut self, id: i32, keys: &[String]) -> bool {
        let node = match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => return false,
        };
        for key in keys {
            node.properties.remove(key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::zvariant::{StructureBuilder, Value};

    fn owned(value: Value<'_>) -> OwnedValue {
        OwnedValue::try_from(value).unwrap()
    }

    fn props(pairs: &[(&str, Value<'static>)]) -> HashMap<String, OwnedValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), owned(v.try_clone().unwrap())))
            .collect()
    }

    fn raw_child(id: i32, pairs: &[(&str, Value<'static>)], children: Vec<OwnedValue>) -> OwnedValue {
        let s = StructureBuilder::new()
            .add_field(id)
            .add_field(props(pairs))
            .add_field(children)
            .build();
        owned(Value::Structure(s))
    }

    fn label(s: &str) -> (&'static str, Value<'static>) {
        (LAYOUT_PROP_LABEL, Value::from(s.to_owned()))
    }

    #[test]
    fn layout_parse_builds_ordered_children() {
        let mut tree = MenuTree::new();
        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![
                raw_child(1, &[label("A")], vec![]),
                raw_child(2, &[label("B")], vec![]),
            ],
        );
        tree.apply_layout(ROOT_ID, 7, raw).unwrap();

        assert_eq!(tree.revision(), 7);
        let entries = tree.children_of(ROOT_ID);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].label(), Some("A"));
        assert_eq!(entries[1].label(), Some("B"));
        // the root is an anchor, never an entry
        assert!(entries.iter().all(|n| n.id != ROOT_ID));
    }

    #[test]
    fn refresh_drops_stale_nodes() {
        let mut tree = MenuTree::new();
        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![
                raw_child(1, &[label("A")], vec![]),
                raw_child(2, &[label("B")], vec![]),
            ],
        );
        tree.apply_layout(ROOT_ID, 1, raw).unwrap();

        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![raw_child(1, &[label("A")], vec![])],
        );
        tree.apply_layout(ROOT_ID, 2, raw).unwrap();

        assert!(tree.node(1).is_some());
        assert!(tree.node(2).is_none());
        assert_eq!(tree.children_of(ROOT_ID).len(), 1);
    }

    #[test]
    fn refresh_patches_existing_nodes_in_place() {
        let mut tree = MenuTree::new();
        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![raw_child(
                1,
                &[label("A"), (LAYOUT_PROP_ENABLED, Value::from(false))],
                vec![],
            )],
        );
        tree.apply_layout(ROOT_ID, 1, raw).unwrap();

        // second layout only carries the label; the enabled flag must survive
        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![raw_child(1, &[label("A2")], vec![])],
        );
        tree.apply_layout(ROOT_ID, 2, raw).unwrap();

        let node = tree.node(1).unwrap();
        assert_eq!(node.label(), Some("A2"));
        assert!(matches!(
            node.properties.get(LAYOUT_PROP_ENABLED),
            Some(LayoutProperty::Enabled(false))
        ));
    }

    #[test]
    fn nested_submenu_round_trips() {
        let mut tree = MenuTree::new();
        let submenu = raw_child(
            3,
            &[
                label("Sub"),
                (LAYOUT_PROP_CHILDREN_DISPLAY, Value::from("submenu")),
            ],
            vec![raw_child(4, &[label("Leaf")], vec![])],
        );
        let raw: RawNode = (ROOT_ID, props(&[]), vec![submenu]);
        tree.apply_layout(ROOT_ID, 1, raw).unwrap();

        assert!(matches!(
            tree.node(3).unwrap().properties.get(LAYOUT_PROP_CHILDREN_DISPLAY),
            Some(LayoutProperty::ChildrenDisplay(true))
        ));
        let sub_entries = tree.children_of(3);
        assert_eq!(sub_entries.len(), 1);
        assert_eq!(sub_entries[0].label(), Some("Leaf"));
    }

    #[test]
    fn malformed_layout_leaves_tree_unchanged() {
        let mut tree = MenuTree::new();
        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![raw_child(1, &[label("A")], vec![])],
        );
        tree.apply_layout(ROOT_ID, 1, raw).unwrap();

        // label with a non-string payload
        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![raw_child(2, &[(LAYOUT_PROP_LABEL, Value::from(13))], vec![])],
        );
        assert!(tree.apply_layout(ROOT_ID, 2, raw).is_err());

        assert_eq!(tree.revision(), 1);
        assert!(tree.node(1).is_some());
        assert!(tree.node(2).is_none());
    }

    #[test]
    fn property_patch_on_unknown_id_is_noop() {
        let mut tree = MenuTree::new();
        let patched = tree
            .patch_properties(
                42,
                vec![("label".to_string(), owned(Value::from("X")))],
            )
            .unwrap();
        assert!(!patched);
        assert!(tree.node(42).is_none());
    }

    #[test]
    fn property_removal_clears_exactly_named_keys() {
        let mut tree = MenuTree::new();
        let raw: RawNode = (
            ROOT_ID,
            props(&[]),
            vec![raw_child(
                1,
                &[label("A"), (LAYOUT_PROP_ENABLED, Value::from(true))],
                vec![],
            )],
        );
        tree.apply_layout(ROOT_ID, 1, raw).unwrap();

        assert!(tree.clear_properties(1, &[LAYOUT_PROP_ENABLED.to_string()]));
        let node = tree.node(1).unwrap();
        assert!(node.properties.get(LAYOUT_PROP_ENABLED).is_none());
        assert_eq!(node.label(), Some("A"));

        // unknown id: no-op
        assert!(!tree.clear_properties(42, &[LAYOUT_PROP_LABEL.to_string()]));
    }

    #[test]
    fn layout_for_unknown_parent_is_ignored() {
        let mut tree = MenuTree::new();
        let raw: RawNode = (7, props(&[]), vec![raw_child(8, &[label("X")], vec![])]);
        assert!(!tree.apply_layout(7, 3, raw).unwrap());

        // nothing was inserted, the revision did not move
        assert!(tree.node(7).is_none());
        assert!(tree.node(8).is_none());
        assert_eq!(tree.revision(), 0);
    }

    #[test]
    fn vendor_property_carrying_an_fd_clones_without_panicking() {
        use std::os::fd::AsFd;

        let stdin = std::io::stdin();
        let value = Value::from(zbus::zvariant::Fd::from(stdin.as_fd()));
        let prop = LayoutProperty::Vendor(owned(value));
        assert!(matches!(prop.clone(), LayoutProperty::Vendor(_)));
    }

    #[test]
    fn toggle_and_type_properties_parse() {
        let prop =
            LayoutProperty::try_from((LAYOUT_PROP_TYPE, owned(Value::from("separator")))).unwrap();
        assert!(matches!(prop, LayoutProperty::Type(TypeProperty::Separator)));

        let prop =
            LayoutProperty::try_from((LAYOUT_PROP_TOGGLE_TYPE, owned(Value::from("radio"))))
                .unwrap();
        assert!(matches!(
            prop,
            LayoutProperty::ToggleType(ToggleProperty::Radio)
        ));

        let prop =
            LayoutProperty::try_from((LAYOUT_PROP_TOGGLE_STATE, owned(Value::from(1)))).unwrap();
        assert!(matches!(prop, LayoutProperty::ToggleState(true)));

        // vendor keys are carried through untouched
        let prop = LayoutProperty::try_from(("x-custom", owned(Value::from("v")))).unwrap();
        assert!(matches!(prop, LayoutProperty::Vendor(_)));
    }
}
