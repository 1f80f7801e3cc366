//! Response directives returned by remote actions.
//!
//! A remote action answers with a list of directive sets. Each set may carry
//! several directive categories at once (values, attrs, prompts, signals,
//! navigation). The categories are applied in the order of [`DirectiveKind`].

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{id_of, Map, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A message shown by an info, error, alert or notify directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Dialog title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Message body.
    #[serde(default)]
    pub message: String,
    /// Follow-up or fallback action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Label of the confirm button.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_btn_title: Option<String>,
    /// Label of the cancel button.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_btn_title: Option<String>,
}

impl Message {
    /// Creates a message with a body only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the follow-up action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// One or many toast messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Notify {
    /// A single toast.
    One(Message),
    /// Several toasts.
    Many(Vec<Message>),
}

impl Notify {
    /// Returns the toasts as a slice-like list.
    pub fn messages(&self) -> Vec<&Message> {
        match self {
            Notify::One(message) => vec![message],
            Notify::Many(messages) => messages.iter().collect(),
        }
    }
}

/// Descriptor of a view to open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDescriptor {
    /// View name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tab title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Model shown by the view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// External resource (html views).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Main view type (`grid`, `form`, `html`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_type: Option<String>,
    /// Domain filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Available views.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<Value>,
    /// View parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map,
    /// View context.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map,
}

impl ViewDescriptor {
    /// Creates an html view for a resource URL.
    pub fn html(title: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            resource: Some(resource.into()),
            view_type: Some("html".into()),
            ..Self::default()
        }
    }
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// PDF document.
    Pdf,
    /// HTML page.
    Html,
    /// Any other format.
    #[serde(other)]
    Other,
}

/// A report attached to the current record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Id of the stored file.
    pub id: i64,
    /// File name.
    pub file_name: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One directive set of an action response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveSet {
    /// Follow-up action to run once this set is handled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<String>,
    /// Exported file to download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_file: Option<String>,
    /// Signal name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// Signal payload.
    #[serde(
        rename = "signal-data",
        alias = "signalData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signal_data: Option<Value>,
    /// Dismissible information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Message>,
    /// Toasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<Notify>,
    /// Blocking error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Message>,
    /// Yes/no confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Message>,
    /// Per-field validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
    /// Partial record values to merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Map>,
    /// Per-target widget attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<BTreeMap<String, Map>>,
    /// Reload the owning view.
    #[serde(default, skip_serializing_if = "is_false")]
    pub reload: bool,
    /// Run the validation pipeline.
    #[serde(default, skip_serializing_if = "is_false")]
    pub validate: bool,
    /// Run the save pipeline.
    #[serde(default, skip_serializing_if = "is_false")]
    pub save: bool,
    /// Start a new record.
    #[serde(default, skip_serializing_if = "is_false")]
    pub new: bool,
    /// Close the current view.
    #[serde(default, skip_serializing_if = "is_false")]
    pub close: bool,
    /// Close the current view (alternate flag).
    #[serde(default, skip_serializing_if = "is_false")]
    pub can_close: bool,
    /// A report was produced.
    #[serde(default, skip_serializing_if = "is_false")]
    pub report: bool,
    /// Link to the rendered report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_link: Option<String>,
    /// Report file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<String>,
    /// Report format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_format: Option<ReportFormat>,
    /// Report attached to the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached: Option<Attachment>,
    /// View to open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewDescriptor>,
}

/// Directive categories in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirectiveKind {
    /// File download.
    ExportFile,
    /// Full application reload.
    RefreshApp,
    /// Tab reload.
    RefreshTab,
    /// Dismissible message.
    Info,
    /// Toasts.
    Notify,
    /// Blocking error.
    Error,
    /// Confirmation.
    Alert,
    /// Field errors.
    Errors,
    /// Value patch.
    Values,
    /// View reload.
    Reload,
    /// Validation request.
    Validate,
    /// Save request.
    Save,
    /// New record request.
    New,
    /// Generic signal.
    Signal,
    /// Attribute patch.
    Attrs,
    /// Report.
    Report,
    /// View open request.
    View,
    /// Close request.
    Close,
}

/// Signal forcing a full application reload.
pub const REFRESH_APP: &str = "refresh-app";
/// Signal scheduling a tab reload.
pub const REFRESH_TAB: &str = "refresh-tab";

impl DirectiveSet {
    /// Returns true if the set carries nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns the categories present in this set, in application order.
    pub fn kinds(&self) -> Vec<DirectiveKind> {
        self.kinds_with(REFRESH_APP, REFRESH_TAB)
    }

    /// Like [`kinds`](Self::kinds), with custom reload signal names.
    pub fn kinds_with(&self, refresh_app: &str, refresh_tab: &str) -> Vec<DirectiveKind> {
        let signal = self.signal.as_deref();
        let checks = [
            (self.export_file.is_some(), DirectiveKind::ExportFile),
            (signal == Some(refresh_app), DirectiveKind::RefreshApp),
            (signal == Some(refresh_tab), DirectiveKind::RefreshTab),
            (self.info.is_some(), DirectiveKind::Info),
            (self.notify.is_some(), DirectiveKind::Notify),
            (self.error.is_some(), DirectiveKind::Error),
            (self.alert.is_some(), DirectiveKind::Alert),
            (self.errors.is_some(), DirectiveKind::Errors),
            (self.values.is_some(), DirectiveKind::Values),
            (self.reload, DirectiveKind::Reload),
            (self.validate, DirectiveKind::Validate),
            (self.save, DirectiveKind::Save),
            (self.new, DirectiveKind::New),
            (
                signal.is_some_and(|s| s != refresh_app && s != refresh_tab),
                DirectiveKind::Signal,
            ),
            (self.attrs.is_some(), DirectiveKind::Attrs),
            (self.report, DirectiveKind::Report),
            (self.view.is_some(), DirectiveKind::View),
            (self.close || self.can_close, DirectiveKind::Close),
        ];
        checks
            .into_iter()
            .filter_map(|(present, kind)| present.then_some(kind))
            .collect()
    }

    /// Returns true if any field error carries a non-blank message.
    pub fn has_field_errors(&self) -> bool {
        self.errors
            .as_ref()
            .is_some_and(|errors| errors.values().any(|msg| !msg.trim().is_empty()))
    }
}

/// The decoded response of one remote action call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionResponse {
    /// Directive sets in server order.
    pub sets: Vec<DirectiveSet>,
}

impl ActionResponse {
    /// Creates a response from directive sets.
    pub fn new(sets: Vec<DirectiveSet>) -> Self {
        Self { sets }
    }

    /// Decodes a response from raw JSON entries.
    ///
    /// Null entries are skipped; any other non-object entry is rejected.
    pub fn from_values(values: Vec<Value>) -> ProtocolResult<Self> {
        let mut sets = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Null => continue,
                Value::Object(_) => sets.push(serde_json::from_value(value)?),
                other => {
                    return Err(ProtocolError::invalid_payload(format!(
                        "expected directive object, got {other}"
                    )))
                }
            }
        }
        Ok(Self { sets })
    }

    /// Returns true if there is no directive set.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Folds all attribute and value patches into leading sets.
    ///
    /// Attribute maps are combined per target; an attribute named `value`
    /// becomes a value patch for its target. Value patches are deep-merged
    /// with [`merge_values`]. The combined attrs set comes first, then the
    /// combined values set, then every remaining non-empty set in order.
    /// Folding stops at the first set carrying field errors: that set and
    /// every later one are kept as sent, so no later patch is applied ahead
    /// of the rejection.
    pub fn collapse(self) -> Self {
        let mut attrs: BTreeMap<String, Map> = BTreeMap::new();
        let mut values = Value::Object(Map::new());
        let mut others = Vec::new();

        let mut sets = self.sets.into_iter();
        while let Some(mut set) = sets.next() {
            if set.has_field_errors() {
                others.push(set);
                others.extend(sets.by_ref());
                break;
            }
            if let Some(set_attrs) = set.attrs.take() {
                for (target, mut entries) in set_attrs {
                    if let Some(value) = entries.remove("value") {
                        let mut patch = Map::new();
                        patch.insert(target.clone(), value);
                        values = merge_values(values, Value::Object(patch));
                    }
                    if !entries.is_empty() {
                        attrs.entry(target).or_default().extend(entries);
                    }
                }
            }
            if let Some(set_values) = set.values.take() {
                values = merge_values(values, Value::Object(set_values));
            }
            if !set.is_empty() {
                others.push(set);
            }
        }

        let mut sets = Vec::with_capacity(others.len() + 2);
        if !attrs.is_empty() {
            sets.push(DirectiveSet {
                attrs: Some(attrs),
                ..DirectiveSet::default()
            });
        }
        if let Value::Object(values) = values {
            if !values.is_empty() {
                sets.push(DirectiveSet {
                    values: Some(values),
                    ..DirectiveSet::default()
                });
            }
        }
        sets.extend(others);
        Self { sets }
    }
}

/// Deep-merges two value patches.
///
/// Arrays take the shape of `next`, each element merged with the element
/// of `prev` sharing its id. Objects are merged key by key. Anything else
/// is replaced by `next`.
pub fn merge_values(prev: Value, next: Value) -> Value {
    match (prev, next) {
        (prev, Value::Array(items)) => {
            let previous = match prev {
                Value::Array(previous) => previous,
                _ => Vec::new(),
            };
            Value::Array(
                items
                    .into_iter()
                    .map(|item| {
                        let id = id_of(&item);
                        let matched = previous
                            .iter()
                            .find(|p| id.is_some() && id_of(p) == id)
                            .cloned();
                        match matched {
                            Some(found) => merge_values(found, item),
                            None => item,
                        }
                    })
                    .collect(),
            )
        }
        (Value::Object(mut prev), Value::Object(next)) => {
            for (key, value) in next {
                let merged = match prev.remove(&key) {
                    Some(old) => merge_values(old, value),
                    None => value,
                };
                prev.insert(key, merged);
            }
            Value::Object(prev)
        }
        (_, next) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(value: Value) -> DirectiveSet {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn decodes_wire_names() {
        let directive = set(json!({
            "signal": "refresh-tab",
            "signal-data": {"x": 1},
            "exportFile": "out.csv",
            "canClose": true,
            "new": true,
            "reportFormat": "pdf",
            "notify": [{"message": "a"}, {"message": "b"}]
        }));
        assert_eq!(directive.signal_data, Some(json!({"x": 1})));
        assert_eq!(directive.export_file.as_deref(), Some("out.csv"));
        assert!(directive.can_close);
        assert!(directive.new);
        assert_eq!(directive.report_format, Some(ReportFormat::Pdf));
        assert_eq!(directive.notify.unwrap().messages().len(), 2);
    }

    #[test]
    fn single_notify() {
        let directive = set(json!({"notify": {"title": "t", "message": "m"}}));
        let notify = directive.notify.unwrap();
        let messages = notify.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].title.as_deref(), Some("t"));
    }

    #[test]
    fn kinds_follow_precedence() {
        let directive = set(json!({
            "close": true,
            "values": {"a": 1},
            "errors": {"a": "bad"},
            "signal": "refresh-app",
            "exportFile": "f"
        }));
        assert_eq!(
            directive.kinds(),
            vec![
                DirectiveKind::ExportFile,
                DirectiveKind::RefreshApp,
                DirectiveKind::Errors,
                DirectiveKind::Values,
                DirectiveKind::Close,
            ]
        );

        let generic = set(json!({"signal": "custom"}));
        assert_eq!(generic.kinds(), vec![DirectiveKind::Signal]);
    }

    #[test]
    fn blank_field_errors_do_not_count() {
        assert!(!set(json!({"errors": {"a": "  "}})).has_field_errors());
        assert!(set(json!({"errors": {"a": "", "b": "required"}})).has_field_errors());
    }

    #[test]
    fn decoding_skips_nulls_and_rejects_scalars() {
        let response =
            ActionResponse::from_values(vec![Value::Null, json!({"reload": true})]).unwrap();
        assert_eq!(response.sets.len(), 1);
        assert!(ActionResponse::from_values(vec![json!(3)]).is_err());
    }

    #[test]
    fn collapse_moves_attr_values() {
        let response = ActionResponse::new(vec![
            set(json!({"attrs": {"name": {"value": "x", "readonly": true}}})),
            set(json!({"values": {"qty": 2}})),
            set(json!({"attrs": {"name": {"hidden": false}}, "info": {"message": "hi"}})),
        ])
        .collapse();

        assert_eq!(response.sets.len(), 3);
        let attrs = response.sets[0].attrs.as_ref().unwrap();
        assert_eq!(attrs["name"]["readonly"], json!(true));
        assert_eq!(attrs["name"]["hidden"], json!(false));
        assert!(attrs["name"].get("value").is_none());

        let values = response.sets[1].values.as_ref().unwrap();
        assert_eq!(values["name"], json!("x"));
        assert_eq!(values["qty"], json!(2));

        assert_eq!(response.sets[2].info.as_ref().unwrap().message, "hi");
        assert!(response.sets[2].attrs.is_none());
    }

    #[test]
    fn collapse_keeps_error_sets_whole() {
        let response = ActionResponse::new(vec![
            set(json!({"values": {"qty": 1}})),
            set(json!({"errors": {"qty": "too small"}, "values": {"qty": 0}})),
        ])
        .collapse();

        assert_eq!(response.sets.len(), 2);
        assert_eq!(response.sets[0].values.as_ref().unwrap()["qty"], json!(1));
        assert!(response.sets[1].has_field_errors());
        assert_eq!(response.sets[1].values.as_ref().unwrap()["qty"], json!(0));
    }

    #[test]
    fn collapse_stops_at_first_error_set() {
        let response = ActionResponse::new(vec![
            set(json!({"values": {"qty": 1}})),
            set(json!({"errors": {"qty": "too many"}})),
            set(json!({"values": {"qty": 0}})),
            set(json!({"attrs": {"qty": {"readonly": true}}})),
        ])
        .collapse();

        assert_eq!(response.sets.len(), 4);
        assert_eq!(response.sets[0].values.as_ref().unwrap()["qty"], json!(1));
        assert!(response.sets[1].has_field_errors());
        assert_eq!(response.sets[2].values.as_ref().unwrap()["qty"], json!(0));
        assert!(response.sets[3].attrs.is_some());
    }

    #[test]
    fn kinds_use_given_signal_names() {
        let directive = set(json!({"signal": "reboot"}));
        assert_eq!(directive.kinds(), vec![DirectiveKind::Signal]);
        assert_eq!(
            directive.kinds_with("reboot", "retab"),
            vec![DirectiveKind::RefreshApp]
        );
        assert!(set(json!({"signal": "refresh-app"}))
            .kinds_with("reboot", "retab")
            .contains(&DirectiveKind::Signal));
    }

    #[test]
    fn merge_values_matches_items_by_id() {
        let prev = json!({"lines": [{"id": 1, "qty": 1, "name": "a"}], "x": {"y": 1}});
        let next = json!({"lines": [{"id": 1, "qty": 5}, {"id": 2}], "x": {"z": 2}});
        let merged = merge_values(prev, next);
        assert_eq!(
            merged,
            json!({
                "lines": [{"id": 1, "qty": 5, "name": "a"}, {"id": 2}],
                "x": {"y": 1, "z": 2}
            })
        );
    }
}
