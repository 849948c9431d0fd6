//! Typed model of a content item's layout tree.
//!
//! A content item is made of sections; each section lists content blocks
//! ("layouts"). A `tabs_group` block nests tabs which in turn list light
//! content blocks. Payloads come from the CMS export and are not trusted:
//! anything that is not a list where a list is expected is read as empty, and
//! entries that fail to parse are skipped.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::keys::ContentId;

/// Structural type of a content block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LayoutKind {
    AutoFocus,
    AutoFocusTopics,
    AutoFocusSheets,
    ManualFocusMinisheet,
    Weather,
    Infolive,
    TabsGroup,
    Other(String),
}

impl LayoutKind {
    pub fn as_str(&self) -> &str {
        match self {
            LayoutKind::AutoFocus => "auto_focus",
            LayoutKind::AutoFocusTopics => "auto_focus_topics",
            LayoutKind::AutoFocusSheets => "auto_focus_sheets",
            LayoutKind::ManualFocusMinisheet => "manual_focus_minisheet",
            LayoutKind::Weather => "weather",
            LayoutKind::Infolive => "infolive",
            LayoutKind::TabsGroup => "tabs_group",
            LayoutKind::Other(name) => name.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "auto_focus" => LayoutKind::AutoFocus,
            "auto_focus_topics" => LayoutKind::AutoFocusTopics,
            "auto_focus_sheets" => LayoutKind::AutoFocusSheets,
            "manual_focus_minisheet" => LayoutKind::ManualFocusMinisheet,
            "weather" => LayoutKind::Weather,
            "infolive" => LayoutKind::Infolive,
            "tabs_group" => LayoutKind::TabsGroup,
            other => LayoutKind::Other(other.to_string()),
        }
    }
}

impl From<String> for LayoutKind {
    fn from(value: String) -> Self {
        LayoutKind::parse(value.trim())
    }
}

impl From<LayoutKind> for String {
    fn from(kind: LayoutKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    #[serde(rename = "layout")]
    pub kind: LayoutKind,
    /// Listing mode of focus blocks; `random` marks a shuffled selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<String>,
    /// Only meaningful on `tabs_group` blocks.
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tabs: Vec<Tab>,
}

impl LayoutNode {
    pub fn new(kind: LayoutKind) -> Self {
        Self {
            kind,
            display_mode: None,
            tabs: Vec::new(),
        }
    }

    pub fn with_display_mode(mut self, mode: impl Into<String>) -> Self {
        self.display_mode = Some(mode.into());
        self
    }

    pub fn with_tab(mut self, tab: Tab) -> Self {
        self.tabs.push(tab);
        self
    }

    /// Blocks evaluated for this node: the node itself, or for a tabs group
    /// the light content of each tab. Groups are only unwrapped one level.
    fn evaluable(&self) -> impl Iterator<Item = &LayoutNode> {
        let is_group = self.kind == LayoutKind::TabsGroup;
        let own = (!is_group).then_some(self);
        let nested = self
            .tabs
            .iter()
            .filter(move |_| is_group)
            .flat_map(|tab| tab.content.iter());
        own.into_iter().chain(nested)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    #[serde(default, deserialize_with = "lenient_list")]
    pub content: Vec<LayoutNode>,
}

impl Tab {
    pub fn new(content: Vec<LayoutNode>) -> Self {
        Self { content }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, deserialize_with = "lenient_list")]
    pub content: Vec<LayoutNode>,
}

impl Section {
    pub fn new(content: Vec<LayoutNode>) -> Self {
        Self { content }
    }
}

/// A content item as rendered by the CMS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub sections: Vec<Section>,
}

impl ContentItem {
    pub fn new(id: impl Into<ContentId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn is_protected(&self) -> bool {
        self.password
            .as_deref()
            .is_some_and(|password| !password.is_empty())
    }

    /// Evaluable blocks in document order. Lazy, so callers can stop early.
    pub fn leaves(&self) -> impl Iterator<Item = &LayoutNode> {
        self.sections
            .iter()
            .flat_map(|section| section.content.iter())
            .flat_map(|node| node.evaluable())
    }
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect()),
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_kind_round_trips_known_and_unknown_names() {
        assert_eq!(LayoutKind::parse("weather"), LayoutKind::Weather);
        assert_eq!(
            LayoutKind::parse("free_text"),
            LayoutKind::Other("free_text".to_string())
        );
        assert_eq!(LayoutKind::TabsGroup.as_str(), "tabs_group");
    }

    #[test]
    fn leaves_unwrap_tabs_groups_in_document_order() {
        let item = ContentItem::new(1_u64)
            .with_section(Section::new(vec![
                LayoutNode::new(LayoutKind::Other("intro".into())),
                LayoutNode::new(LayoutKind::TabsGroup)
                    .with_tab(Tab::new(vec![LayoutNode::new(LayoutKind::Weather)]))
                    .with_tab(Tab::new(vec![LayoutNode::new(LayoutKind::Infolive)])),
            ]))
            .with_section(Section::new(vec![LayoutNode::new(LayoutKind::AutoFocus)]));

        let kinds: Vec<&str> = item.leaves().map(|node| node.kind.as_str()).collect();
        assert_eq!(kinds, ["intro", "weather", "infolive", "auto_focus"]);
    }

    #[test]
    fn malformed_lists_deserialize_as_empty() {
        let item: ContentItem = serde_json::from_value(serde_json::json!({
            "id": 12,
            "sections": [
                { "content": false },
                { "content": [ { "layout": "weather" }, { "no_layout": true } ] },
                "garbage"
            ]
        }))
        .expect("lenient parse");

        assert_eq!(item.sections.len(), 2);
        let kinds: Vec<&LayoutKind> = item.leaves().map(|node| &node.kind).collect();
        assert_eq!(kinds, [&LayoutKind::Weather]);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let item: ContentItem = serde_json::from_str(r#"{ "sections": null }"#).expect("parse");
        assert_eq!(item.leaves().count(), 0);
        assert!(!item.is_protected());
    }

    #[test]
    fn empty_password_is_not_protection() {
        assert!(!ContentItem::new(1_u64).with_password("").is_protected());
        assert!(ContentItem::new(1_u64).with_password("secret").is_protected());
    }
}
