//! Trigger registration and dispatch.
//!
//! A [`Trigger`] declares a path pattern and the change kinds it reacts to.
//! [`TriggerRegistry::dispatch`] binds the pattern's wildcards into the
//! event, runs every matching trigger to completion, and reports each
//! outcome. Errors are not swallowed: the caller decides whether the event
//! should be redelivered.

use crate::counter::CounterManager;
use crate::error::{Result, StoreError};
use crate::notify::ChangeNotifier;
use crate::pattern::PathPattern;
use crate::rewrite::{DerivedFieldRewriter, RewriteOutcome};
use crate::types::{ChangeEvent, ChangeKind};
use std::sync::Arc;

/// A handler bound to a path pattern.
pub trait Trigger: Send + Sync {
    fn name(&self) -> &str;

    fn pattern(&self) -> &PathPattern;

    fn kinds(&self) -> &[ChangeKind];

    /// Handle one event. `event.params` holds this trigger's bindings.
    fn handle(&self, event: &ChangeEvent) -> Result<()>;
}

/// Outcome of one trigger for one event.
#[derive(Debug)]
pub struct TriggerResult {
    pub trigger: String,
    pub result: Result<()>,
}

/// Outcome of dispatching one event.
#[derive(Debug)]
pub struct DispatchReport {
    pub event_id: String,
    pub results: Vec<TriggerResult>,
}

impl DispatchReport {
    /// Number of triggers that ran.
    pub fn matched(&self) -> usize {
        self.results.len()
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &StoreError)> {
        self.results.iter().filter_map(|r| match r.result {
            Err(ref e) => Some((r.trigger.as_str(), e)),
            Ok(()) => None,
        })
    }

    /// Names of triggers whose failure is worth another attempt.
    pub fn transient_failures(&self) -> Vec<String> {
        self.failures()
            .filter(|(_, e)| e.is_transient())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// First failure, if any.
    pub fn into_result(self) -> Result<()> {
        self.results
            .into_iter()
            .find_map(|r| r.result.err())
            .map_or(Ok(()), Err)
    }
}

/// Ordered set of registered triggers.
#[derive(Default)]
pub struct TriggerRegistry {
    triggers: Vec<Arc<dyn Trigger>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, trigger: Arc<dyn Trigger>) {
        tracing::debug!(trigger = trigger.name(), pattern = %trigger.pattern(), "trigger registered");
        self.triggers.push(trigger);
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Run every trigger matching `event`, in registration order.
    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchReport {
        self.dispatch_where(event, |_| true)
    }

    /// Run only the named triggers that match `event`. Used to redeliver an
    /// event to the triggers that failed it, so triggers that already
    /// committed their effect do not run twice.
    pub fn dispatch_to(&self, event: &ChangeEvent, names: &[String]) -> DispatchReport {
        self.dispatch_where(event, |name| names.iter().any(|n| n == name))
    }

    fn dispatch_where(&self, event: &ChangeEvent, selected: impl Fn(&str) -> bool) -> DispatchReport {
        let mut results = Vec::new();

        for trigger in &self.triggers {
            if !selected(trigger.name()) || !trigger.kinds().contains(&event.kind) {
                continue;
            }
            let params = match trigger.pattern().matches(&event.path) {
                Some(params) => params,
                None => continue,
            };

            let bound = event.clone().with_params(params);
            let result = trigger.handle(&bound);
            if let Err(ref e) = result {
                tracing::error!(
                    trigger = trigger.name(),
                    event_id = %event.id,
                    path = %event.path,
                    kind = %event.kind,
                    error = %e,
                    "trigger failed"
                );
            }
            results.push(TriggerResult {
                trigger: trigger.name().to_string(),
                result,
            });
        }

        DispatchReport {
            event_id: event.id.clone(),
            results,
        }
    }
}

/// Counts created and deleted documents matching `pattern`.
pub struct CounterTrigger {
    name: String,
    pattern: PathPattern,
    counter: Arc<CounterManager>,
}

impl CounterTrigger {
    pub fn new(name: impl Into<String>, pattern: PathPattern, counter: Arc<CounterManager>) -> Self {
        Self {
            name: name.into(),
            pattern,
            counter,
        }
    }
}

impl Trigger for CounterTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    fn kinds(&self) -> &[ChangeKind] {
        &[ChangeKind::Create, ChangeKind::Delete]
    }

    fn handle(&self, event: &ChangeEvent) -> Result<()> {
        self.counter.apply(event).map(|_| ())
    }
}

/// Rewrites derived fields, then notifies about fresh writes.
pub struct RewriteTrigger {
    name: String,
    pattern: PathPattern,
    rewriter: Arc<DerivedFieldRewriter>,
    notifier: Option<Arc<ChangeNotifier>>,
}

impl RewriteTrigger {
    pub fn new(
        name: impl Into<String>,
        pattern: PathPattern,
        rewriter: Arc<DerivedFieldRewriter>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            rewriter,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl Trigger for RewriteTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    fn kinds(&self) -> &[ChangeKind] {
        &[ChangeKind::Create, ChangeKind::Update]
    }

    fn handle(&self, event: &ChangeEvent) -> Result<()> {
        let written = match self.rewriter.rewrite(event)? {
            RewriteOutcome::Written(doc) => doc,
            _ => return Ok(()),
        };

        if let Some(ref notifier) = self.notifier {
            match event.kind {
                ChangeKind::Create => {
                    notifier.notify_written(&event.params, &written, None);
                }
                ChangeKind::Update if notifier.config().on_update => {
                    notifier.notify_written(&event.params, &written, event.before());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Trigger backed by a closure.
pub struct FnTrigger<F> {
    name: String,
    pattern: PathPattern,
    kinds: Vec<ChangeKind>,
    f: F,
}

impl<F> FnTrigger<F>
where
    F: Fn(&ChangeEvent) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, pattern: PathPattern, kinds: Vec<ChangeKind>, f: F) -> Self {
        Self {
            name: name.into(),
            pattern,
            kinds,
            f,
        }
    }
}

impl<F> Trigger for FnTrigger<F>
where
    F: Fn(&ChangeEvent) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    fn kinds(&self) -> &[ChangeKind] {
        &self.kinds
    }

    fn handle(&self, event: &ChangeEvent) -> Result<()> {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocPath, Document, Fields, Timestamp};
    use parking_lot::Mutex;

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent::create(Document {
            path: DocPath::parse(path).unwrap(),
            fields: Fields::new(),
            version: 1,
            update_time: Timestamp::now(),
        })
    }

    #[test]
    fn test_dispatch_binds_params_per_trigger() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TriggerRegistry::new();

        let s = Arc::clone(&seen);
        registry.register(Arc::new(FnTrigger::new(
            "cities",
            PathPattern::parse("area/{areaId}/cities/{cityId}").unwrap(),
            vec![ChangeKind::Create],
            move |e: &ChangeEvent| {
                s.lock().push(format!("{}:{}", e.param("areaId").unwrap_or("-"), e.param("cityId").unwrap_or("-")));
                Ok(())
            },
        )));
        let s = Arc::clone(&seen);
        registry.register(Arc::new(FnTrigger::new(
            "deletes-only",
            PathPattern::parse("area/{areaId}/cities/{cityId}").unwrap(),
            vec![ChangeKind::Delete],
            move |_: &ChangeEvent| {
                s.lock().push("delete".to_string());
                Ok(())
            },
        )));

        let report = registry.dispatch(&event("area/north/cities/boston"));
        assert_eq!(report.matched(), 1);
        assert!(report.is_success());
        assert_eq!(*seen.lock(), vec!["north:boston".to_string()]);

        let report = registry.dispatch(&event("area/north/towns/salem"));
        assert_eq!(report.matched(), 0);
    }

    #[test]
    fn test_failures_are_reported() {
        let mut registry = TriggerRegistry::new();
        registry.register(Arc::new(FnTrigger::new(
            "broken",
            PathPattern::parse("cities/{cityId}").unwrap(),
            vec![ChangeKind::Create],
            |e: &ChangeEvent| Err(StoreError::Write(format!("cannot write {}", e.path))),
        )));
        registry.register(Arc::new(FnTrigger::new(
            "fine",
            PathPattern::parse("cities/{cityId}").unwrap(),
            vec![ChangeKind::Create],
            |_: &ChangeEvent| Ok(()),
        )));

        let report = registry.dispatch(&event("cities/boston"));
        assert_eq!(report.matched(), 2);
        assert!(!report.is_success());
        assert_eq!(report.failures().map(|(name, _)| name).collect::<Vec<_>>(), vec!["broken"]);
        assert!(matches!(report.into_result(), Err(StoreError::Write(_))));
    }

    #[test]
    fn test_dispatch_to_runs_only_named_triggers() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TriggerRegistry::new();
        for name in ["first", "second"] {
            let c = Arc::clone(&calls);
            registry.register(Arc::new(FnTrigger::new(
                name,
                PathPattern::parse("cities/{cityId}").unwrap(),
                vec![ChangeKind::Create],
                move |_: &ChangeEvent| {
                    c.lock().push(name);
                    Ok(())
                },
            )));
        }

        let report = registry.dispatch_to(&event("cities/boston"), &["second".to_string()]);
        assert_eq!(report.matched(), 1);
        assert_eq!(*calls.lock(), vec!["second"]);
    }

    #[test]
    fn test_transient_failures_named() {
        let mut registry = TriggerRegistry::new();
        registry.register(Arc::new(FnTrigger::new(
            "flaky",
            PathPattern::parse("cities/{cityId}").unwrap(),
            vec![ChangeKind::Create],
            |_: &ChangeEvent| Err(StoreError::Write("busy".to_string())),
        )));
        registry.register(Arc::new(FnTrigger::new(
            "bad",
            PathPattern::parse("cities/{cityId}").unwrap(),
            vec![ChangeKind::Create],
            |_: &ChangeEvent| Err(StoreError::InvalidPath("cities".to_string())),
        )));

        let report = registry.dispatch(&event("cities/boston"));
        assert_eq!(report.transient_failures(), vec!["flaky".to_string()]);
    }
}
