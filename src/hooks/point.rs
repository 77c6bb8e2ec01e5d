//! Extension point names.

use serde::{Deserialize, Serialize};

/// A named point in the host's business logic at which the pipeline runs.
///
/// The conventional points cover the save/render/delete paths of the CMS;
/// `Custom` carries any other name an extension and the host agree on.
/// Serialized as the snake_case string in both directions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExtensionPoint {
    /// Before an entity is persisted; hooks transform the candidate value.
    BeforeSave,

    /// After an entity was persisted; for side effects only.
    AfterSave,

    /// Before an entity is rendered.
    BeforeRender,

    /// After an entity was rendered.
    AfterRender,

    /// Before an entity is deleted.
    BeforeDelete,

    /// After an entity was deleted.
    AfterDelete,

    /// When any extension is activated.
    OnActivate,

    /// When any extension is deactivated.
    OnDeactivate,

    /// Any other point the host exposes.
    Custom(String),
}

impl ExtensionPoint {
    /// The conventional extension points invoked by host business logic.
    pub fn conventional() -> &'static [ExtensionPoint] {
        &[
            ExtensionPoint::BeforeSave,
            ExtensionPoint::AfterSave,
            ExtensionPoint::BeforeRender,
            ExtensionPoint::AfterRender,
            ExtensionPoint::BeforeDelete,
            ExtensionPoint::AfterDelete,
            ExtensionPoint::OnActivate,
            ExtensionPoint::OnDeactivate,
        ]
    }

    /// The snake_case name of this point.
    pub fn as_str(&self) -> &str {
        match self {
            ExtensionPoint::BeforeSave => "before_save",
            ExtensionPoint::AfterSave => "after_save",
            ExtensionPoint::BeforeRender => "before_render",
            ExtensionPoint::AfterRender => "after_render",
            ExtensionPoint::BeforeDelete => "before_delete",
            ExtensionPoint::AfterDelete => "after_delete",
            ExtensionPoint::OnActivate => "on_activate",
            ExtensionPoint::OnDeactivate => "on_deactivate",
            ExtensionPoint::Custom(name) => name,
        }
    }

    /// True for `before_*` points, whose hook return values the host feeds
    /// back into its own logic.
    pub fn transforms_input(&self) -> bool {
        matches!(
            self,
            ExtensionPoint::BeforeSave | ExtensionPoint::BeforeRender | ExtensionPoint::BeforeDelete
        )
    }
}

impl std::fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ExtensionPoint {
    fn from(name: &str) -> Self {
        for point in ExtensionPoint::conventional() {
            if point.as_str() == name {
                return point.clone();
            }
        }
        ExtensionPoint::Custom(name.to_string())
    }
}

impl From<String> for ExtensionPoint {
    fn from(name: String) -> Self {
        ExtensionPoint::from(name.as_str())
    }
}

impl From<ExtensionPoint> for String {
    fn from(point: ExtensionPoint) -> Self {
        point.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        for point in ExtensionPoint::conventional() {
            assert_eq!(&ExtensionPoint::from(point.as_str()), point);
        }
    }

    #[test]
    fn test_custom_point() {
        let point = ExtensionPoint::from("on_render");
        assert_eq!(point, ExtensionPoint::Custom("on_render".to_string()));
        assert_eq!(point.to_string(), "on_render");
    }

    #[test]
    fn test_transforms_input() {
        assert!(ExtensionPoint::BeforeSave.transforms_input());
        assert!(!ExtensionPoint::AfterSave.transforms_input());
        assert!(!ExtensionPoint::Custom("on_render".into()).transforms_input());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&ExtensionPoint::BeforeDelete).unwrap();
        assert_eq!(json, "\"before_delete\"");
        let back: ExtensionPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExtensionPoint::BeforeDelete);
    }
}
