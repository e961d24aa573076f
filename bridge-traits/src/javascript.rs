//! JavaScript Runtime Abstraction
//!
//! The bridge never holds JavaScript closures. The JavaScript side registers
//! its callbacks under opaque string ids and passes those ids along with every
//! inbound message; the core answers by delivering [`CallbackBatch`]es that
//! name the ids to invoke and the JSON payload for each.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One callback the JavaScript runtime must invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackInvocation {
    /// Callback id issued by the JavaScript side
    pub callback_id: String,
    /// Argument passed to the callback; `None` invokes it with no argument
    pub payload: Option<Value>,
    /// Whether this invocation reports a failure
    pub is_error: bool,
}

impl CallbackInvocation {
    /// Successful invocation carrying a payload.
    pub fn success(callback_id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            callback_id: callback_id.into(),
            payload,
            is_error: false,
        }
    }

    /// Failed invocation carrying an error payload.
    pub fn error(callback_id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            callback_id: callback_id.into(),
            payload,
            is_error: true,
        }
    }
}

/// Ordered callback invocations delivered in a single boundary crossing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackBatch {
    invocations: Vec<CallbackInvocation>,
}

impl CallbackBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(invocation: CallbackInvocation) -> Self {
        Self {
            invocations: vec![invocation],
        }
    }

    pub fn push(&mut self, invocation: CallbackInvocation) {
        self.invocations.push(invocation);
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallbackInvocation> {
        self.invocations.iter()
    }

    pub fn into_invocations(self) -> Vec<CallbackInvocation> {
        self.invocations
    }

    /// Ids in delivery order.
    pub fn callback_ids(&self) -> Vec<&str> {
        self.invocations
            .iter()
            .map(|invocation| invocation.callback_id.as_str())
            .collect()
    }

    /// Render the batch as one self-invoking script.
    ///
    /// Each invocation becomes `NS.callbacks["id"](payload);`, where `NS` is the
    /// global object the JavaScript side registered its callbacks on. Callback
    /// ids are emitted as JSON string literals so quotes in ids cannot break
    /// out of the property access. U+2028 and U+2029 are escaped as well: JSON
    /// allows them raw, but pre-ES2019 engines read them as line terminators.
    ///
    /// ```
    /// use bridge_traits::javascript::{CallbackBatch, CallbackInvocation};
    ///
    /// let batch = CallbackBatch::single(CallbackInvocation::success("cb1", None));
    /// assert_eq!(
    ///     batch.to_script("SQLiteNativeDB"),
    ///     r#"(function(){SQLiteNativeDB.callbacks["cb1"]();})();"#
    /// );
    /// ```
    pub fn to_script(&self, namespace: &str) -> String {
        let mut script = String::from("(function(){");
        for invocation in &self.invocations {
            let id = Value::String(invocation.callback_id.clone());
            script.push_str(namespace);
            script.push_str(".callbacks[");
            push_script_json(&mut script, &id);
            script.push_str("](");
            if let Some(payload) = &invocation.payload {
                push_script_json(&mut script, payload);
            }
            script.push_str(");");
        }
        script.push_str("})();");
        script
    }
}

fn push_script_json(script: &mut String, value: &Value) {
    for c in value.to_string().chars() {
        match c {
            '\u{2028}' => script.push_str("\\u2028"),
            '\u{2029}' => script.push_str("\\u2029"),
            c => script.push(c),
        }
    }
}

impl FromIterator<CallbackInvocation> for CallbackBatch {
    fn from_iter<I: IntoIterator<Item = CallbackInvocation>>(iter: I) -> Self {
        Self {
            invocations: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CallbackBatch {
    type Item = CallbackInvocation;
    type IntoIter = std::vec::IntoIter<CallbackInvocation>;

    fn into_iter(self) -> Self::IntoIter {
        self.invocations.into_iter()
    }
}

/// JavaScript runtime trait
///
/// Hands callback batches back to the JavaScript runtime hosted in the
/// application view:
/// - **Android**: `WebView.post` + `loadUrl("javascript:...")`
/// - **iOS**: `WKWebView.evaluateJavaScript`
/// - **Desktop**: webview `eval` or an IPC channel
///
/// Implementations must deliver a batch as one unit and must keep the order
/// of invocations inside it. The core calls `deliver` from a dedicated task,
/// never while it holds a database lock.
#[async_trait]
pub trait JavascriptRuntime: Send + Sync {
    /// Deliver one batch of callback invocations
    async fn deliver(&self, batch: CallbackBatch) -> Result<()>;

    /// Whether the runtime can currently accept deliveries
    ///
    /// A runtime whose view has been torn down should return `false`; the core
    /// then drops batches instead of delivering them.
    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_rendering_order() {
        let batch: CallbackBatch = vec![
            CallbackInvocation::success("a", Some(json!({"rowsAffected": 1}))),
            CallbackInvocation::error("b", Some(json!({"type": "error", "result": "boom"}))),
        ]
        .into_iter()
        .collect();

        let script = batch.to_script("NS");
        assert_eq!(
            script,
            r#"(function(){NS.callbacks["a"]({"rowsAffected":1});NS.callbacks["b"]({"result":"boom","type":"error"});})();"#
        );
    }

    #[test]
    fn test_script_escapes_callback_ids() {
        let batch = CallbackBatch::single(CallbackInvocation::success("x\"]();alert(1);//", None));
        let script = batch.to_script("NS");
        assert!(script.contains(r#"NS.callbacks["x\"]();alert(1);//"]()"#));
    }

    #[test]
    fn test_script_escapes_js_line_separators() {
        let batch = CallbackBatch::single(CallbackInvocation::success(
            "cb\u{2029}",
            Some(json!({"rows": [{"note": "a\u{2028}b"}]})),
        ));

        let script = batch.to_script("NS");
        assert!(!script.contains('\u{2028}'));
        assert!(!script.contains('\u{2029}'));
        assert_eq!(
            script,
            r#"(function(){NS.callbacks["cb\u2029"]({"rows":[{"note":"a\u2028b"}]});})();"#
        );
    }

    #[test]
    fn test_batch_accessors() {
        let mut batch = CallbackBatch::new();
        assert!(batch.is_empty());

        batch.push(CallbackInvocation::success("one", None));
        batch.push(CallbackInvocation::error("two", None));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.callback_ids(), vec!["one", "two"]);
        assert!(batch.iter().nth(1).map(|i| i.is_error).unwrap_or(false));
    }

    #[test]
    fn test_invocation_serializes_camel_case() {
        let invocation = CallbackInvocation::success("cb", None);
        let value = serde_json::to_value(&invocation).unwrap();
        assert_eq!(value["callbackId"], "cb");
        assert_eq!(value["isError"], false);
    }
}
