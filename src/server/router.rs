//! Agent registry & message router — name-based and content-based dispatch.
//!
//! Replaces the duck-typed keyword-scan pattern observed in the reference
//! implementation's `A2AServer._process_message` (`a2a_server.server`),
//! which inspected message text for ad-hoc lexemes ("calculate", "remember",
//! …) to pick a handler. Modeled instead as a small sum-typed router:
//! explicit-by-name lookup, then ordered content-match rules, then a
//! fallback handler — the re-architecture this spec's design notes call for
//! in place of keyword duck-typing.

use std::sync::Arc;

use regex::Regex;

use super::agent_executor::{AgentExecutor, RequestContext};
use super::event_queue::EventQueue;
use crate::error::A2AResult;

/// One content-match rule: if `pattern` matches the user's input text, route
/// to `handler`. Rules are evaluated in registration order; the first match wins.
pub struct RouterRule {
    /// Regex evaluated against [`RequestContext::get_user_input`].
    pub pattern: Regex,
    /// Handler to invoke when the pattern matches.
    pub handler: Arc<dyn AgentExecutor>,
}

impl RouterRule {
    /// Create a rule from a regex pattern and handler.
    pub fn new(pattern: &str, handler: Arc<dyn AgentExecutor>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            handler,
        })
    }
}

/// Routes an incoming request to the right [`AgentExecutor`].
///
/// Three dispatch strategies, tried in order:
/// 1. **Explicit by name** — the caller already resolved a named agent at the
///    HTTP layer (e.g. a path segment or header) and hands the router its handler
///    directly; this router is bypassed entirely in that case.
/// 2. **Content-based rules** — `[RouterRule]`s checked in order against the
///    message text.
/// 3. **Fallback** — the trivial-echo default handler, used when no rule matches.
pub struct AgentRouter {
    rules: Vec<RouterRule>,
    fallback: Arc<dyn AgentExecutor>,
}

impl AgentRouter {
    /// Create a router with the given ordered rules and a mandatory fallback handler.
    pub fn new(rules: Vec<RouterRule>, fallback: Arc<dyn AgentExecutor>) -> Self {
        Self { rules, fallback }
    }

    /// Pick a handler for the given context by scanning content-match rules
    /// in order, falling back to the default handler if none match.
    pub fn route(&self, context: &RequestContext) -> Arc<dyn AgentExecutor> {
        let text = context.get_user_input(" ");
        for rule in &self.rules {
            if rule.pattern.is_match(&text) {
                return Arc::clone(&rule.handler);
            }
        }
        Arc::clone(&self.fallback)
    }
}

#[async_trait::async_trait]
impl AgentExecutor for AgentRouter {
    /// Dispatches to whichever handler [`route`](Self::route) selects.
    ///
    /// Handler failures are not propagated as request-path errors — per the
    /// router's contract, a failing handler must still reach a terminal
    /// FAILED transition through the normal event queue. This method simply
    /// forwards the handler's own `Result`; callers (the request handler)
    /// are responsible for turning an `Err` into a FAILED status update
    /// rather than a protocol error, matching the existing pattern already
    /// used by `DefaultRequestHandler`.
    async fn execute(&self, context: RequestContext, event_queue: EventQueue) -> A2AResult<()> {
        let handler = self.route(&context);
        handler.execute(context, event_queue).await
    }

    async fn cancel(&self, context: RequestContext, event_queue: EventQueue) -> A2AResult<()> {
        let handler = self.route(&context);
        handler.cancel(context, event_queue).await
    }
}

/// The trivial echo handler used when no router rule matches and no agent
/// logic has been supplied. Mirrors the reference implementation's default
/// `"Echo: <input>"` reply.
pub struct EchoHandler {
    /// Prefix prepended to the echoed text, e.g. `"Echo: "`.
    pub prefix: String,
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self {
            prefix: "Echo: ".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl AgentExecutor for EchoHandler {
    async fn execute(&self, context: RequestContext, event_queue: EventQueue) -> A2AResult<()> {
        use super::task_updater::TaskUpdater;

        let updater = TaskUpdater::new(
            event_queue,
            context.task_id.clone(),
            context.context_id.clone(),
        );
        let input = context.get_user_input(" ");
        updater
            .complete_with_text(&format!("{}{}", self.prefix, input))
            .await
    }

    async fn cancel(&self, context: RequestContext, event_queue: EventQueue) -> A2AResult<()> {
        use super::task_updater::TaskUpdater;

        let updater = TaskUpdater::new(event_queue, context.task_id, context.context_id);
        updater.cancel(None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, Part, Role};

    fn ctx_with_text(text: &str) -> RequestContext {
        RequestContext {
            task_id: "t1".to_string(),
            context_id: "c1".to_string(),
            message: Some(Message {
                message_id: "m1".to_string(),
                role: Role::User,
                kind: "message".to_string(),
                parts: vec![Part::text(text)],
                context_id: None,
                task_id: None,
                metadata: None,
                extensions: None,
                reference_task_ids: None,
            }),
            task: None,
            configuration: None,
            related_tasks: vec![],
            metadata: None,
            call_context: None,
        }
    }

    #[tokio::test]
    async fn routes_to_matching_rule() {
        let calc = Arc::new(EchoHandler {
            prefix: "Calc: ".to_string(),
        });
        let rules = vec![RouterRule::new(r"(?i)add|subtract|multiply", calc.clone()).unwrap()];
        let router = AgentRouter::new(rules, Arc::new(EchoHandler::default()));

        let picked = router.route(&ctx_with_text("please add 2 and 2"));
        let queue = EventQueue::with_default_capacity();
        let mut rx = queue.subscribe();
        picked
            .execute(ctx_with_text("please add 2 and 2"), queue)
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        match event {
            crate::types::StreamResponse::StatusUpdate(update) => {
                let text = match update.status.message.unwrap().parts[0].clone() {
                    Part::Text { text, .. } => text,
                    _ => panic!("expected text part"),
                };
                assert!(text.starts_with("Calc: "));
            }
            _ => panic!("expected status update"),
        }
    }

    #[tokio::test]
    async fn falls_back_when_no_rule_matches() {
        let router: AgentRouter = AgentRouter::new(vec![], Arc::new(EchoHandler::default()));
        let picked = router.route(&ctx_with_text("hello there"));
        let queue = EventQueue::with_default_capacity();
        let mut rx = queue.subscribe();
        picked.execute(ctx_with_text("hello there"), queue).await.unwrap();
        let event = rx.recv().await.unwrap();
        match event {
            crate::types::StreamResponse::StatusUpdate(update) => {
                let text = match update.status.message.unwrap().parts[0].clone() {
                    Part::Text { text, .. } => text,
                    _ => panic!("expected text part"),
                };
                assert_eq!(text, "Echo: hello there");
            }
            _ => panic!("expected status update"),
        }
    }
}
