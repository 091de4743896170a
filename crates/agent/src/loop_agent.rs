//! Agent loop - request, dispatch, append, repeat

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sandagent_provider::{ChatParams, ChatResponse, Provider, ProviderError, ToolChoice, Usage};

use crate::context::ContextBuilder;
use crate::conversation::{Conversation, Turn};
use crate::dispatcher::{CallOutcome, Dispatcher};
use crate::tools::{Sandbox, ToolRegistry};
use crate::{AgentError, AgentFailure};

/// Called with every turn as it is appended
pub type TurnObserver = Arc<dyn Fn(&Turn) + Send + Sync>;

/// Everything a run needs to know; the loop reads no other settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on backend requests per run
    pub max_iterations: u32,
    /// Retries after the first failed request
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub sandbox_root: PathBuf,
    pub tool_timeout: Duration,
    pub request_timeout: Duration,
    pub run_timeout: Option<Duration>,
    /// Turns kept in a failure report
    pub diagnostic_turns: usize,
    pub parallel_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.2,
            max_iterations: 20,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            max_retry_backoff: Duration::from_secs(8),
            sandbox_root: PathBuf::from("."),
            tool_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            run_timeout: None,
            diagnostic_turns: 6,
            parallel_tool_calls: false,
        }
    }
}

/// Successful end of a run
#[derive(Debug, Clone)]
pub struct AgentAnswer {
    pub text: String,
    pub iterations: u32,
    pub usage: Usage,
    pub conversation: Conversation,
}

#[derive(Debug, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: Value,
}

enum LoopState {
    AwaitingModel,
    HandlingCall(Vec<PendingCall>),
    Done(Result<String, AgentError>),
}

/// Cancellation token plus optional deadline, shared by every suspension point
struct RunGuard {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunGuard {
    fn new(cancel: CancellationToken, run_timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: run_timeout.map(|t| Instant::now() + t),
        }
    }

    fn check(&self) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(cancelled());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(deadline_exceeded()),
            _ => Ok(()),
        }
    }

    async fn race<F: Future>(&self, fut: F) -> Result<F::Output, AgentError> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled()),
            _ = deadline => Err(deadline_exceeded()),
            output = fut => Ok(output),
        }
    }
}

fn cancelled() -> AgentError {
    AgentError::Cancelled("cancellation requested".to_string())
}

fn deadline_exceeded() -> AgentError {
    AgentError::Cancelled("run deadline exceeded".to_string())
}

/// Drives one conversation from prompt to answer
pub struct AgentLoop<P: Provider> {
    provider: Arc<P>,
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    system_prompt: String,
    config: AgentConfig,
    observer: Option<TurnObserver>,
}

impl<P: Provider> AgentLoop<P> {
    pub fn new(provider: P, registry: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        let sandbox = Sandbox::new(config.sandbox_root.clone());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), sandbox, config.tool_timeout);
        let system_prompt = ContextBuilder::new().build_system_prompt(&registry);

        Self {
            provider: Arc::new(provider),
            registry,
            dispatcher,
            system_prompt,
            config,
            observer: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_observer(mut self, observer: TurnObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub async fn run(&self, prompt: &str) -> crate::Result<AgentAnswer> {
        self.run_with_cancel(prompt, CancellationToken::new()).await
    }

    /// Run until the model answers, a limit is hit, or `cancel` fires
    pub async fn run_with_cancel(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> crate::Result<AgentAnswer> {
        let guard = RunGuard::new(cancel, self.config.run_timeout);
        let mut convo = Conversation::seed(self.system_prompt.clone(), prompt);
        self.observe(&convo);

        let mut iterations = 0u32;
        let mut usage = Usage::default();
        let mut state = LoopState::AwaitingModel;

        info!(
            "◆ RUN STARTED: {} tool(s), max {} iteration(s)",
            self.registry.len(),
            self.config.max_iterations
        );

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if iterations >= self.config.max_iterations {
                        LoopState::Done(Err(AgentError::MaxIterationsExceeded(
                            self.config.max_iterations,
                        )))
                    } else if let Err(e) = guard.check() {
                        LoopState::Done(Err(e))
                    } else {
                        iterations += 1;
                        debug!("◆ ITERATION {}/{}", iterations, self.config.max_iterations);

                        match self.request_model(&convo, &guard).await {
                            Ok(response) => {
                                usage += response.usage;
                                let (next, state) = self.interpret(convo, response);
                                convo = next;
                                state
                            }
                            Err(e) => LoopState::Done(Err(e)),
                        }
                    }
                }
                LoopState::HandlingCall(pending) => {
                    let (outcomes, interrupted) = self.handle_calls(&pending, &guard).await;
                    for (call, outcome) in pending.into_iter().zip(outcomes) {
                        convo = self.append(
                            &convo,
                            Turn::CallResult {
                                id: call.id,
                                outcome,
                            },
                        );
                    }
                    match interrupted {
                        Some(e) => LoopState::Done(Err(e)),
                        None => LoopState::AwaitingModel,
                    }
                }
                LoopState::Done(Ok(text)) => {
                    info!(
                        "◆ RUN COMPLETE: {} iteration(s), {} token(s)",
                        iterations, usage.total_tokens
                    );
                    return Ok(AgentAnswer {
                        text,
                        iterations,
                        usage,
                        conversation: convo,
                    });
                }
                LoopState::Done(Err(error)) => {
                    info!("◆ RUN FAILED AFTER {} ITERATION(S): {}", iterations, error);
                    return Err(AgentFailure {
                        error,
                        iterations,
                        usage,
                        recent_turns: convo.tail(self.config.diagnostic_turns).to_vec(),
                    });
                }
            };
        }
    }

    /// One backend request, retried with exponential backoff
    async fn request_model(
        &self,
        convo: &Conversation,
        guard: &RunGuard,
    ) -> Result<ChatResponse, AgentError> {
        let params = ChatParams {
            model: self.config.model.clone(),
            messages: convo.to_messages(),
            tools: self.registry.definitions(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tool_choice: ToolChoice::Auto,
        };

        let mut attempt = 0u32;
        loop {
            guard.check()?;
            attempt += 1;

            let request = tokio::time::timeout(
                self.config.request_timeout,
                self.provider.chat(params.clone()),
            );
            let error = match guard.race(request).await? {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout,
            };

            if !error.is_retryable() || attempt > self.config.max_retries {
                return Err(AgentError::BackendUnavailable {
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            let delay = self.backoff(attempt);
            warn!(
                "◆ BACKEND ERROR (ATTEMPT {}/{}): {}, RETRYING IN {:?}",
                attempt,
                self.config.max_retries + 1,
                error,
                delay
            );
            guard.race(tokio::time::sleep(delay)).await?;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .retry_backoff
            .saturating_mul(factor)
            .min(self.config.max_retry_backoff)
    }

    fn interpret(&self, convo: Conversation, response: ChatResponse) -> (Conversation, LoopState) {
        if !response.has_tool_calls() {
            let text = response.content.clone().unwrap_or_default();
            let convo = self.append(&convo, Turn::Model(response.content));
            return (convo, LoopState::Done(Ok(text)));
        }

        let mut convo = convo;
        if let Some(text) = response.content.filter(|t| !t.trim().is_empty()) {
            convo = self.append(&convo, Turn::Model(Some(text)));
        }

        let pending: Vec<PendingCall> = response
            .tool_calls
            .into_iter()
            .map(|call| PendingCall {
                id: if call.id.is_empty() {
                    format!("call_{}", Uuid::new_v4().simple())
                } else {
                    call.id
                },
                name: call.name,
                arguments: call.arguments,
            })
            .collect();

        for call in &pending {
            info!("◆ CALL: {}({})", call.name, call.arguments);
            convo = self.append(
                &convo,
                Turn::CallRequest {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            );
        }

        (convo, LoopState::HandlingCall(pending))
    }

    /// Outcomes in request order, stopping early on cancellation
    async fn handle_calls(
        &self,
        pending: &[PendingCall],
        guard: &RunGuard,
    ) -> (Vec<CallOutcome>, Option<AgentError>) {
        if self.config.parallel_tool_calls {
            if let Err(e) = guard.check() {
                return (Vec::new(), Some(e));
            }
            let mut slots: Vec<Option<CallOutcome>> = pending.iter().map(|_| None).collect();
            let mut running: FuturesUnordered<_> = pending
                .iter()
                .enumerate()
                .map(|(index, call)| async move {
                    (index, self.dispatcher.dispatch(&call.name, &call.arguments).await)
                })
                .collect();
            let drained = guard
                .race(async {
                    while let Some((index, outcome)) = running.next().await {
                        slots[index] = Some(outcome);
                    }
                })
                .await;
            drop(running);

            // Finished outcomes up to the first call still running
            let outcomes: Vec<CallOutcome> = slots.into_iter().map_while(|slot| slot).collect();
            return (outcomes, drained.err());
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for call in pending {
            if let Err(e) = guard.check() {
                return (outcomes, Some(e));
            }
            match guard
                .race(self.dispatcher.dispatch(&call.name, &call.arguments))
                .await
            {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => return (outcomes, Some(e)),
            }
        }
        (outcomes, None)
    }

    fn append(&self, convo: &Conversation, turn: Turn) -> Conversation {
        if let Some(observer) = &self.observer {
            observer(&turn);
        }
        convo.append(turn)
    }

    fn observe(&self, convo: &Conversation) {
        if let Some(observer) = &self.observer {
            convo.turns().iter().for_each(|turn| observer(turn));
        }
    }
}
