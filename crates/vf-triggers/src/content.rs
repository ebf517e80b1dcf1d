//! Notification, SMS and call state filters
//!
//! These detectors are stateless: each event is matched against every
//! workflow's filter and every match is dispatched.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::OnceLock;
use tracing::{debug, error, warn};
use vf_core::{
    trigger_types, CallState, EventKind, NotificationPosted, SmsReceived, SourceEvent,
    TriggerPayload, Workflow,
};

use crate::dispatcher::Dispatcher;
use crate::error::{TriggerError, TriggerResult};
use crate::lifecycle::TriggerSource;
use crate::services::TriggerServices;

const IGNORED_PHRASES: &str =
    r"(?i)\b(?:RatingCode|vscode|versionCode|unicode|discount code|fancode|encode|decode|barcode|codex)\b";

const SENSITIVE_PHRASES: &str = r"code|One[-\s]Time[-\s]Password|کد|رمز|\bOTP\W|\b2FA\W|Einmalkennwort|contraseña|c[oó]digo|clave|\bel siguiente PIN\W|验证码|校验码|識別碼|認證|驗證|动态码|動態碼|код|סיסמ|\bהקוד\W|\bקוד\W|\bKodu\W|\bKodunuz\W|인증번호|PIN";

/// Pulls one-time codes out of message text
///
/// Text mentioning an ignored phrase never yields a code. Otherwise a code
/// following a keyword wins over a code preceding one.
pub struct CodeExtractor {
    ignored: Regex,
    keyword_first: Regex,
    code_first: Regex,
}

impl CodeExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            ignored: Regex::new(IGNORED_PHRASES)?,
            keyword_first: Regex::new(&format!(
                r"(?i)(?:{SENSITIVE_PHRASES})[^\d\w]*([a-zA-Z0-9]{{4,8}})"
            ))?,
            code_first: Regex::new(&format!(
                r"(?i)([a-zA-Z0-9]{{4,8}})[^\d\w]* (?:is your|is the|is|就是|是您的|为您的) (?:{SENSITIVE_PHRASES})"
            ))?,
        })
    }

    /// Process-wide extractor, `None` if the patterns failed to build
    pub fn shared() -> Option<&'static CodeExtractor> {
        static SHARED: OnceLock<Option<CodeExtractor>> = OnceLock::new();
        SHARED
            .get_or_init(|| match CodeExtractor::new() {
                Ok(extractor) => Some(extractor),
                Err(e) => {
                    error!(error = %e, "Verification code patterns failed to compile");
                    None
                }
            })
            .as_ref()
    }

    pub fn extract(&self, text: &str) -> Option<String> {
        if self.ignored.is_match(text) {
            return None;
        }
        self.keyword_first
            .captures(text)
            .or_else(|| self.code_first.captures(text))
            .and_then(|captures| captures.get(1))
            .map(|code| code.as_str().to_string())
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// A configured, non-empty filter value
fn set(filter: &Option<String>) -> Option<&str> {
    filter.as_deref().filter(|f| !f.is_empty())
}

fn resolve<T: for<'de> Deserialize<'de>>(workflow: &Workflow) -> TriggerResult<T> {
    workflow
        .trigger_config
        .resolve()
        .map_err(|e| TriggerError::invalid_config(&workflow.id, e))
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct NotificationFilter {
    #[serde(default)]
    app_filter: Option<String>,
    #[serde(default)]
    title_filter: Option<String>,
    #[serde(default)]
    content_filter: Option<String>,
}

impl NotificationFilter {
    fn matches(&self, notification: &NotificationPosted) -> bool {
        if set(&self.app_filter).is_some_and(|app| app != notification.package) {
            return false;
        }
        if set(&self.title_filter).is_some_and(|title| !contains_ignore_case(&notification.title, title)) {
            return false;
        }
        if set(&self.content_filter)
            .is_some_and(|content| !contains_ignore_case(&notification.content, content))
        {
            return false;
        }
        true
    }
}

/// Posted notification filter
pub struct NotificationSource {
    workflows: DashMap<String, (Workflow, NotificationFilter)>,
    dispatcher: Dispatcher,
}

impl NotificationSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_dispatcher(services.dispatcher.clone())
    }

    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            workflows: DashMap::new(),
            dispatcher,
        }
    }
}

#[async_trait]
impl TriggerSource for NotificationSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::NOTIFICATION
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::Notification]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        self.workflows.clear();
        for workflow in workflows {
            match resolve::<NotificationFilter>(&workflow) {
                Ok(filter) => {
                    self.workflows.insert(workflow.id.clone(), (workflow, filter));
                }
                Err(e) => warn!(error = %e, "Skipping notification trigger"),
            }
        }
    }

    async fn on_event(&self, event: SourceEvent) {
        let SourceEvent::Notification(notification) = event else {
            return;
        };
        let matching: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|e| e.value().1.matches(&notification))
            .map(|e| e.value().0.clone())
            .collect();
        if matching.is_empty() {
            return;
        }

        debug!(package = %notification.package, count = matching.len(), "Notification matched");
        let payload = TriggerPayload::new(trigger_types::NOTIFICATION)
            .with_var("package_name", json!(notification.package))
            .with_var("title", json!(notification.title))
            .with_var("content", json!(notification.content))
            .with_var("id", json!(notification.key));
        self.dispatcher.dispatch_all(matching, &payload);
    }
}

// ---------------------------------------------------------------------------
// SMS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TextFilterType {
    #[default]
    Any,
    Contains,
    NotContains,
    Regex,
    VerificationCode,
}

#[derive(Debug, Clone, Deserialize)]
struct SmsTrigger {
    #[serde(default)]
    sender_filter_type: TextFilterType,
    #[serde(default)]
    sender_filter_value: String,
    #[serde(default)]
    content_filter_type: TextFilterType,
    #[serde(default)]
    content_filter_value: String,
}

/// One side of an SMS filter with its regex compiled up front
#[derive(Debug)]
struct TextFilter {
    kind: TextFilterType,
    value: String,
    /// `None` for an invalid pattern, which never matches
    regex: Option<Regex>,
}

impl TextFilter {
    fn new(workflow_id: &str, kind: TextFilterType, value: String) -> Self {
        let regex = if kind == TextFilterType::Regex {
            Regex::new(&value)
                .map_err(|e| warn!(workflow_id, pattern = %value, error = %e, "Invalid SMS filter regex"))
                .ok()
        } else {
            None
        };
        Self { kind, value, regex }
    }

    fn matches(&self, text: &str) -> bool {
        match self.kind {
            TextFilterType::Any | TextFilterType::VerificationCode => true,
            TextFilterType::Contains => contains_ignore_case(text, &self.value),
            TextFilterType::NotContains => !contains_ignore_case(text, &self.value),
            TextFilterType::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(text)),
        }
    }
}

#[derive(Debug)]
struct SmsFilter {
    sender: TextFilter,
    content: TextFilter,
}

impl SmsFilter {
    fn resolve(workflow: &Workflow) -> TriggerResult<Self> {
        let trigger: SmsTrigger = resolve(workflow)?;
        if trigger.sender_filter_type == TextFilterType::VerificationCode {
            return Err(TriggerError::invalid_config(
                &workflow.id,
                "verification_code only applies to content",
            ));
        }
        Ok(Self {
            sender: TextFilter::new(&workflow.id, trigger.sender_filter_type, trigger.sender_filter_value),
            content: TextFilter::new(&workflow.id, trigger.content_filter_type, trigger.content_filter_value),
        })
    }

    fn wants_code(&self) -> bool {
        self.content.kind == TextFilterType::VerificationCode
    }
}

/// Incoming SMS filter
pub struct SmsSource {
    workflows: DashMap<String, (Workflow, SmsFilter)>,
    dispatcher: Dispatcher,
}

impl SmsSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_dispatcher(services.dispatcher.clone())
    }

    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            workflows: DashMap::new(),
            dispatcher,
        }
    }

    fn on_sms(&self, sms: SmsReceived) {
        let mut code: Option<Option<String>> = None;
        let mut extract = || {
            code.get_or_insert_with(|| CodeExtractor::shared().and_then(|x| x.extract(&sms.content)))
                .clone()
        };

        let mut matched = Vec::new();
        for entry in self.workflows.iter() {
            let (workflow, filter) = entry.value();
            if !filter.sender.matches(&sms.sender) || !filter.content.matches(&sms.content) {
                continue;
            }
            let verification_code = if filter.wants_code() {
                match extract() {
                    Some(code) => Some(code),
                    None => continue,
                }
            } else {
                None
            };
            matched.push((workflow.clone(), verification_code));
        }

        for (workflow, verification_code) in matched {
            debug!(workflow_id = %workflow.id, sender = %sms.sender, "SMS matched");
            let mut payload = TriggerPayload::new(trigger_types::SMS)
                .with_var("sender", json!(sms.sender))
                .with_var("content", json!(sms.content));
            if let Some(code) = verification_code {
                payload = payload.with_var("verification_code", json!(code));
            }
            self.dispatcher.dispatch(workflow, payload);
        }
    }
}

#[async_trait]
impl TriggerSource for SmsSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::SMS
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::Sms]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        self.workflows.clear();
        for workflow in workflows {
            match SmsFilter::resolve(&workflow) {
                Ok(filter) => {
                    self.workflows.insert(workflow.id.clone(), (workflow, filter));
                }
                Err(e) => warn!(error = %e, "Skipping SMS trigger"),
            }
        }
    }

    async fn on_event(&self, event: SourceEvent) {
        if let SourceEvent::Sms(sms) = event {
            self.on_sms(sms);
        }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CallType {
    #[default]
    Any,
    Ringing,
    Offhook,
    Idle,
}

impl CallType {
    fn matches(&self, state: CallState) -> bool {
        matches!(
            (self, state),
            (CallType::Any, _)
                | (CallType::Ringing, CallState::Ringing)
                | (CallType::Offhook, CallState::Offhook)
                | (CallType::Idle, CallState::Idle)
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CallTrigger {
    #[serde(default)]
    call_type: CallType,
}

/// Telephony call state filter
pub struct CallSource {
    workflows: DashMap<String, (Workflow, CallType)>,
    dispatcher: Dispatcher,
}

impl CallSource {
    pub fn new(services: &TriggerServices) -> Self {
        Self::with_dispatcher(services.dispatcher.clone())
    }

    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            workflows: DashMap::new(),
            dispatcher,
        }
    }
}

#[async_trait]
impl TriggerSource for CallSource {
    fn trigger_type(&self) -> &'static str {
        trigger_types::CALL
    }

    fn event_kinds(&self) -> &'static [EventKind] {
        &[EventKind::CallState]
    }

    async fn set_workflows(&self, workflows: Vec<Workflow>) {
        self.workflows.clear();
        for workflow in workflows {
            match resolve::<CallTrigger>(&workflow) {
                Ok(trigger) => {
                    self.workflows.insert(workflow.id.clone(), (workflow, trigger.call_type));
                }
                Err(e) => warn!(error = %e, "Skipping call trigger"),
            }
        }
    }

    async fn on_event(&self, event: SourceEvent) {
        let SourceEvent::CallState { state } = event else {
            return;
        };
        let matching: Vec<Workflow> = self
            .workflows
            .iter()
            .filter(|e| e.value().1.matches(state))
            .map(|e| e.value().0.clone())
            .collect();
        if matching.is_empty() {
            return;
        }
        debug!(state = state.as_str(), count = matching.len(), "Call state matched");
        let payload = TriggerPayload::new(trigger_types::CALL).with_var("call_state", json!(state.as_str()));
        self.dispatcher.dispatch_all(matching, &payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settle, RecordingExecutor};
    use std::sync::Arc;

    fn extractor() -> &'static CodeExtractor {
        CodeExtractor::shared().unwrap()
    }

    #[test]
    fn test_extract_keyword_first() {
        assert_eq!(
            extractor().extract("Your verification code: 482913. Do not share it."),
            Some("482913".to_string())
        );
        assert_eq!(extractor().extract("【银行】验证码 739201，5分钟内有效"), Some("739201".to_string()));
        assert_eq!(extractor().extract("Ваш код: 5521"), Some("5521".to_string()));
    }

    #[test]
    fn test_extract_code_first() {
        assert_eq!(extractor().extract("482913 is your code"), Some("482913".to_string()));
    }

    #[test]
    fn test_extract_ignores_phrases() {
        assert_eq!(extractor().extract("Scan the barcode 12345678 at the counter"), None);
        assert_eq!(extractor().extract("Use discount code SAVE2024 today"), None);
        assert_eq!(extractor().extract("See you at 5"), None);
    }

    fn sms_workflow(id: &str, pairs: &[(&str, &str)]) -> Workflow {
        pairs
            .iter()
            .fold(Workflow::new(id, trigger_types::SMS), |w, (k, v)| w.with_config(*k, json!(v)))
    }

    async fn sms(source: &SmsSource, sender: &str, content: &str) {
        source
            .on_event(SourceEvent::Sms(SmsReceived {
                sender: sender.into(),
                content: content.into(),
            }))
            .await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_sender_filters() {
        let executor = RecordingExecutor::new();
        let source = SmsSource::with_dispatcher(Dispatcher::new(executor.clone()));
        source
            .set_workflows(vec![
                sms_workflow("any", &[]),
                sms_workflow("bank", &[("sender_filter_type", "contains"), ("sender_filter_value", "BANK")]),
                sms_workflow("not_bank", &[("sender_filter_type", "not_contains"), ("sender_filter_value", "bank")]),
                sms_workflow("digits", &[("sender_filter_type", "regex"), ("sender_filter_value", r"^\d+$")]),
                sms_workflow("broken", &[("sender_filter_type", "regex"), ("sender_filter_value", "(")]),
            ])
            .await;

        sms(&source, "MyBank", "hello").await;
        let mut ids = executor.workflow_ids();
        ids.sort();
        assert_eq!(ids, vec!["any", "bank"]);

        sms(&source, "10086", "hello").await;
        let mut ids = executor.workflow_ids()[2..].to_vec();
        ids.sort();
        assert_eq!(ids, vec!["any", "digits", "not_bank"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_verification_code_filter() {
        let executor = RecordingExecutor::new();
        let source = SmsSource::with_dispatcher(Dispatcher::new(executor.clone()));
        source
            .set_workflows(vec![sms_workflow("otp", &[("content_filter_type", "verification_code")])])
            .await;

        sms(&source, "Bank", "Lunch at noon?").await;
        assert_eq!(executor.count(), 0);

        sms(&source, "Bank", "Your verification code: 482913").await;
        assert_eq!(executor.vars("verification_code"), vec![json!("482913")]);
        assert_eq!(executor.vars("sender"), vec![json!("Bank")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_content_contains_ignores_case() {
        let executor = RecordingExecutor::new();
        let source = SmsSource::with_dispatcher(Dispatcher::new(executor.clone()));
        source
            .set_workflows(vec![sms_workflow(
                "parcel",
                &[("content_filter_type", "contains"), ("content_filter_value", "PARCEL")],
            )])
            .await;

        sms(&source, "Courier", "Your parcel is at the locker").await;
        assert_eq!(executor.count(), 1);
        assert!(executor.payloads()[0].var("verification_code").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_filters() {
        let executor = RecordingExecutor::new();
        let source = NotificationSource::with_dispatcher(Dispatcher::new(executor.clone()));
        source
            .set_workflows(vec![
                Workflow::new("chat", trigger_types::NOTIFICATION)
                    .with_config("app_filter", json!("com.chat"))
                    .with_config("title_filter", json!("alice")),
                Workflow::new("all", trigger_types::NOTIFICATION),
            ])
            .await;

        let post = |package: &str, title: &str| {
            SourceEvent::Notification(NotificationPosted {
                package: package.into(),
                title: title.into(),
                content: "hi".into(),
                key: "0|k".into(),
            })
        };
        source.on_event(post("com.chat", "Alice Smith")).await;
        source.on_event(post("com.other", "Alice Smith")).await;
        settle().await;

        let mut ids = executor.workflow_ids();
        ids.sort();
        assert_eq!(ids, vec!["all", "all", "chat"]);
        assert!(executor.vars("id").iter().all(|id| id == &json!("0|k")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_filter() {
        let executor: Arc<RecordingExecutor> = RecordingExecutor::new();
        let source = CallSource::with_dispatcher(Dispatcher::new(executor.clone()));
        source
            .set_workflows(vec![
                Workflow::new("ring", trigger_types::CALL).with_config("call_type", json!("ringing")),
                Workflow::new("any", trigger_types::CALL),
                Workflow::new("bad", trigger_types::CALL).with_config("call_type", json!("dialing")),
            ])
            .await;
        assert_eq!(source.workflows.len(), 2);

        source.on_event(SourceEvent::CallState { state: CallState::Idle }).await;
        settle().await;
        assert_eq!(executor.workflow_ids(), vec!["any"]);
        assert_eq!(executor.vars("call_state"), vec![json!("idle")]);
    }
}
