//! Sequential execution driver

use crate::errors::FlowError;
use crate::strategies::{DefaultFailureHandler, FailureHandler, FailureHandlerResult};
use crate::types::*;
use async_trait::async_trait;
use extensions_bridge::{HighlightService, PageActionExecutor, StepOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MIN_DELAY_SECS: f64 = 0.1;
pub const MAX_DELAY_SECS: f64 = 10.0;
pub const DEFAULT_DELAY_SECS: f64 = 0.6;

/// Clamp to `[0.1, 10]` seconds and round to one decimal. Non-finite input falls back to
/// the default.
pub fn clamp_delay_secs(secs: f64) -> f64 {
    if !secs.is_finite() {
        return DEFAULT_DELAY_SECS;
    }
    (secs.clamp(MIN_DELAY_SECS, MAX_DELAY_SECS) * 10.0).round() / 10.0
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Pause between two dispatched steps
    pub delay: Duration,
    /// Pause after highlighting a target
    pub highlight_settle: Duration,
    pub failure_strategy: FailureStrategy,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs_f64(DEFAULT_DELAY_SECS),
            highlight_settle: Duration::from_millis(120),
            failure_strategy: FailureStrategy::Continue,
        }
    }
}

impl DriverOptions {
    pub fn with_delay_secs(mut self, secs: f64) -> Self {
        self.delay = Duration::from_secs_f64(clamp_delay_secs(secs));
        self
    }

    /// Unclamped delay, for tests and tooling that need sub-100ms pacing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_highlight_settle(mut self, settle: Duration) -> Self {
        self.highlight_settle = settle;
        self
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }
}

#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Run `steps` in order until done or `cancel` fires.
    async fn execute(&self, steps: &[PlannedStep], cancel: &CancellationToken) -> RunReport;
}

pub struct ExecutionDriver {
    page: Arc<dyn PageActionExecutor>,
    highlighter: Arc<dyn HighlightService>,
    failure_handler: Arc<dyn FailureHandler>,
    options: DriverOptions,
}

impl ExecutionDriver {
    pub fn new(
        page: Arc<dyn PageActionExecutor>,
        highlighter: Arc<dyn HighlightService>,
        options: DriverOptions,
    ) -> Self {
        Self {
            page,
            highlighter,
            failure_handler: Arc::new(DefaultFailureHandler::new()),
            options,
        }
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = handler;
        self
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Highlight failures never block the step.
    async fn highlight(&self, selector: &str, cancel: &CancellationToken) {
        if let Err(err) = self.highlighter.highlight(selector).await {
            debug!(selector, code = err.code(), "highlight failed");
        }
        sleep_or_cancel(self.options.highlight_settle, cancel).await;
    }

    async fn dispatch(&self, action: &StepAction) -> Result<(), FlowError> {
        let outcome: StepOutcome = match action {
            StepAction::Click { selector } => self.page.click(selector).await?,
            StepAction::InputText { selector, text } => {
                self.page.set_value(selector, text).await?
            }
            StepAction::Scroll { y } => self.page.scroll(*y).await?,
            StepAction::Wait { ms } => self.page.wait(*ms).await?,
        };
        if outcome.ok {
            Ok(())
        } else {
            Err(FlowError::StepRejected(
                outcome.error.unwrap_or_else(|| "Step failed.".to_string()),
            ))
        }
    }

    /// Returns the step result and whether the run should stop.
    async fn execute_action(
        &self,
        step: &PlannedStep,
        action: &StepAction,
        cancel: &CancellationToken,
    ) -> (StepResult, bool) {
        info!(step = %step.step_id, action = action.kind(), "executing step");
        let result = StepResult::new(step);

        if let Some(selector) = action.selector() {
            self.highlight(selector, cancel).await;
        }

        let mut attempt = 1;
        loop {
            let outcome = self.dispatch(action).await;
            let error = match outcome {
                Ok(()) => {
                    let mut result = result.with_success();
                    result.attempts = attempt;
                    return (result.finish(), false);
                }
                Err(error) => error,
            };

            match self.failure_handler.handle_failure(
                &step.step_id,
                self.options.failure_strategy,
                &error,
                attempt,
            ) {
                FailureHandlerResult::Retry {
                    attempt: next,
                    backoff_ms,
                } => {
                    if !sleep_or_cancel(Duration::from_millis(backoff_ms), cancel).await {
                        let mut result = result.with_error(error.to_string());
                        result.attempts = attempt;
                        return (result.finish(), false);
                    }
                    attempt = next;
                }
                decision => {
                    let mut result = result.with_error(error.to_string());
                    result.attempts = attempt;
                    return (result.finish(), decision == FailureHandlerResult::Abort);
                }
            }
        }
    }
}

#[async_trait]
impl FlowExecutor for ExecutionDriver {
    async fn execute(&self, steps: &[PlannedStep], cancel: &CancellationToken) -> RunReport {
        let mut report = RunReport::new();
        info!(run = %report.run_id, steps = steps.len(), "run started");
        let mut dispatched_any = false;

        for (i, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            debug!(step = %step.step_id, index = i + 1, total = steps.len(), "processing step");

            match &step.plan {
                StepPlan::Skip(reason) => {
                    debug!(step = %step.step_id, reason = %reason, "skipping step");
                    report
                        .steps
                        .push(StepResult::new(step).skipped(reason.clone()).finish());
                }
                StepPlan::Invalid(error) => {
                    warn!(step = %step.step_id, %error, "step cannot be dispatched");
                    report
                        .steps
                        .push(StepResult::new(step).with_error(error.to_string()).finish());
                }
                StepPlan::Execute(action) => {
                    if dispatched_any && !sleep_or_cancel(self.options.delay, cancel).await {
                        report.cancelled = true;
                        break;
                    }
                    dispatched_any = true;
                    let (result, abort) = self.execute_action(step, action, cancel).await;
                    report.steps.push(result);
                    if abort {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        if let Err(err) = self.highlighter.clear().await {
            debug!(code = err.code(), "clearing highlight failed");
        }
        if cancel.is_cancelled() {
            report.cancelled = report.steps.len() < steps.len();
        }

        let report = report.finish();
        info!(
            run = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            cancelled = report.cancelled,
            "run finished"
        );
        report
    }
}

/// Sleep unless cancelled first; `false` when cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extensions_bridge::{BridgeError, ScriptedPage};
    use tokio::sync::broadcast;

    fn scripted() -> Arc<ScriptedPage> {
        let (bus, _) = broadcast::channel(32);
        Arc::new(ScriptedPage::new(bus))
    }

    fn fast() -> DriverOptions {
        DriverOptions::default()
            .with_delay(Duration::from_millis(1))
            .with_highlight_settle(Duration::ZERO)
    }

    fn click(id: &str, selector: &str) -> PlannedStep {
        PlannedStep::new(
            id,
            format!("click {selector}"),
            StepPlan::Execute(StepAction::Click {
                selector: selector.into(),
            }),
        )
    }

    #[test]
    fn delay_is_clamped_and_rounded() {
        assert_eq!(clamp_delay_secs(0.0), 0.1);
        assert_eq!(clamp_delay_secs(42.0), 10.0);
        assert_eq!(clamp_delay_secs(0.66), 0.7);
        assert_eq!(clamp_delay_secs(f64::NAN), DEFAULT_DELAY_SECS);
        let delay = DriverOptions::default().with_delay_secs(0.04).delay;
        assert!((delay.as_secs_f64() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn failing_step_does_not_stop_the_run() {
        let page = scripted();
        page.add_element("#ok");
        let driver = ExecutionDriver::new(page.clone(), page.clone(), fast());
        let steps = vec![
            click("1", "#missing"),
            PlannedStep::new("2", "deleted", StepPlan::Skip("deleted".into())),
            click("3", "#ok"),
        ];

        let report = tokio_test::block_on(driver.execute(&steps, &CancellationToken::new()));

        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.steps[0].error.as_deref(), Some("Element not found."));
        assert!(!report.cancelled);
        assert_eq!(page.clicks_on("#ok"), 1);
    }

    #[test]
    fn abort_strategy_stops_after_first_failure() {
        let page = scripted();
        let driver = ExecutionDriver::new(
            page.clone(),
            page.clone(),
            fast().with_failure_strategy(FailureStrategy::Abort),
        );
        let steps = vec![click("1", "#missing"), click("2", "#missing")];

        let report = tokio_test::block_on(driver.execute(&steps, &CancellationToken::new()));
        assert!(report.aborted);
        assert_eq!(report.steps.len(), 1);
    }

    #[test]
    fn cancelled_token_runs_nothing() {
        let page = scripted();
        page.set_permissive(true);
        let driver = ExecutionDriver::new(page.clone(), page.clone(), fast());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = tokio_test::block_on(driver.execute(&[click("1", "#a")], &cancel));
        assert!(report.cancelled);
        assert!(report.steps.is_empty());
    }

    struct Unreachable;

    #[async_trait]
    impl PageActionExecutor for Unreachable {
        async fn click(&self, _selector: &str) -> Result<StepOutcome, BridgeError> {
            Err(BridgeError::NoReceiver("content script not injected".into()))
        }
        async fn set_value(&self, _s: &str, _t: &str) -> Result<StepOutcome, BridgeError> {
            Err(BridgeError::NoTab)
        }
        async fn scroll(&self, _y: f64) -> Result<StepOutcome, BridgeError> {
            Err(BridgeError::NoTab)
        }
        async fn wait(&self, _ms: u64) -> Result<StepOutcome, BridgeError> {
            Ok(StepOutcome::ok())
        }
    }

    #[test]
    fn bridge_errors_are_reported_with_codes() {
        let page = scripted();
        let driver = ExecutionDriver::new(Arc::new(Unreachable), page.clone(), fast());
        let report =
            tokio_test::block_on(driver.execute(&[click("1", "#a")], &CancellationToken::new()));
        let error = report.steps[0].error.clone().unwrap();
        assert!(error.starts_with("NO_RECEIVER"));
    }
}
