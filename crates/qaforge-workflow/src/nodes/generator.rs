use std::path::{Path, PathBuf};

use tracing::{info, warn};

use qaforge_core::error::{QaforgeError, Result};
use qaforge_core::traits::AiResponder;
use qaforge_core::types::{ArtifactKind, ChatMessage, Intent, WorkflowEvent};

use crate::pipeline::context::WorkflowContext;
use crate::pipeline::node::NodeServices;

/// Generates the page object class from the recorded actions.
pub struct PomGenerator {
    pages_dir: PathBuf,
}

impl PomGenerator {
    pub fn new(pages_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages_dir: pages_dir.into(),
        }
    }

    pub(crate) async fn run(&self, ctx: &mut WorkflowContext, services: &NodeServices) -> Result<()> {
        if ctx.recorded_history.is_empty() {
            warn!("No actions recorded, skipping page object generation");
            return Ok(());
        }

        let class_name = pom_class_name(&ctx.test_name);
        let prompt = pom_prompt(&class_name, &ctx.steps_payload().to_string());
        let generated = generate_verified(services, ArtifactKind::Pom, prompt, &class_name).await?;

        let path = self.pages_dir.join(format!("{}Page.ts", class_name));
        write_artifact(services, ArtifactKind::Pom, &path, &generated).await?;

        ctx.pom_class_name = Some(class_name.clone());
        ctx.pom_path = Some(path.clone());

        optimize(services, ArtifactKind::Pom, &path, &class_name).await;
        Ok(())
    }
}

/// Generates the test spec that drives the page object.
pub struct SpecGenerator {
    specs_dir: PathBuf,
}

impl SpecGenerator {
    pub fn new(specs_dir: impl Into<PathBuf>) -> Self {
        Self {
            specs_dir: specs_dir.into(),
        }
    }

    pub(crate) async fn run(&self, ctx: &mut WorkflowContext, services: &NodeServices) -> Result<()> {
        let Some(class_name) = ctx.pom_class_name.clone() else {
            warn!("No page object generated, skipping spec generation");
            return Ok(());
        };

        let prompt = spec_prompt(&class_name, &ctx.test_name, &ctx.steps_payload().to_string());
        let generated = generate_verified(services, ArtifactKind::Spec, prompt, &class_name).await?;

        let path = self.specs_dir.join(format!("{}.spec.ts", ctx.test_name));
        write_artifact(services, ArtifactKind::Spec, &path, &generated).await?;

        ctx.spec_path = Some(path.clone());

        optimize(services, ArtifactKind::Spec, &path, &class_name).await;
        Ok(())
    }
}

/// Code returned by the generate/validate/fix cycle.
#[derive(Debug)]
struct Generated {
    code: String,
    valid: bool,
}

/// Generate, validate, and fix at most once.
async fn generate_verified(
    services: &NodeServices,
    kind: ArtifactKind,
    prompt: String,
    class_name: &str,
) -> Result<Generated> {
    let draft = ask_for_code(services.responder.as_ref(), vec![ChatMessage::user(prompt)]).await?;
    let report = services.validator.validate(kind, &draft, class_name);
    if report.valid {
        return Ok(Generated {
            code: draft,
            valid: true,
        });
    }

    warn!(kind = %kind, errors = ?report.errors, "Generated code failed validation, asking for a fix");
    let fixed = ask_for_code(
        services.responder.as_ref(),
        vec![ChatMessage::user(fixer_prompt(kind, &draft, &report.errors))],
    )
    .await?;

    let report = services.validator.validate(kind, &fixed, class_name);
    if !report.valid {
        warn!(kind = %kind, errors = ?report.errors, "Fixed code is still invalid, keeping it");
    }
    Ok(Generated {
        code: fixed,
        valid: report.valid,
    })
}

/// Ask for code and strip any fence. A tool call is an error here.
pub(crate) async fn ask_for_code(responder: &dyn AiResponder, history: Vec<ChatMessage>) -> Result<String> {
    match responder.respond(&history, &[]).await? {
        Intent::Text(text) => Ok(strip_code_fences(&text)),
        Intent::ToolCall { name, .. } => Err(QaforgeError::LlmRequest(format!(
            "expected code but the model proposed tool '{}'",
            name
        ))),
    }
}

async fn write_artifact(
    services: &NodeServices,
    kind: ArtifactKind,
    path: &Path,
    generated: &Generated,
) -> Result<()> {
    services.sink.write(path, &generated.code).await?;
    info!(kind = %kind, path = %path.display(), valid = generated.valid, "Generated artifact");
    services.events.publish(WorkflowEvent::ArtifactWritten {
        kind,
        path: path.display().to_string(),
        valid: generated.valid,
    });
    Ok(())
}

/// Optional refactoring pass. Never fails the node.
async fn optimize(services: &NodeServices, kind: ArtifactKind, path: &Path, class_name: &str) {
    let Some(optimizer) = services.optimizer.as_deref() else {
        return;
    };
    match try_optimize(services, optimizer, kind, path, class_name).await {
        Ok(true) => info!(kind = %kind, path = %path.display(), "Optimization applied"),
        Ok(false) => {}
        Err(e) => warn!(kind = %kind, error = %e, "Optimization failed, keeping generated code"),
    }
}

async fn try_optimize(
    services: &NodeServices,
    optimizer: &dyn AiResponder,
    kind: ArtifactKind,
    path: &Path,
    class_name: &str,
) -> Result<bool> {
    let original = services.sink.read(path).await?;
    let history = vec![
        ChatMessage::system(optimizer_prompt(kind, class_name)),
        ChatMessage::user(format!("CURRENT CODE:\n{}", original)),
    ];
    let code = ask_for_code(optimizer, history).await?;

    let report = services.validator.validate(kind, &code, class_name);
    if !report.valid {
        warn!(kind = %kind, errors = ?report.errors, "Optimization discarded, result failed validation");
        return Ok(false);
    }

    services.sink.write(path, &code).await?;
    Ok(true)
}

/// PascalCase class base name for a test, e.g. `login_flow` -> `LoginFlow`.
pub fn pom_class_name(test_name: &str) -> String {
    let mut name: String = test_name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();

    if name.is_empty() {
        name = "Generated".to_string();
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Test");
    }
    name
}

/// Strip a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // A bare language tag may follow the fence on its own line
        let body = match after.find('\n') {
            Some(nl) if is_language_tag(&after[..nl]) => &after[nl + 1..],
            _ => after,
        };
        let body = body.find("```").map_or(body, |end| &body[..end]);
        return body.trim().to_string();
    }

    trimmed.to_string()
}

fn is_language_tag(line: &str) -> bool {
    line.trim_end()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}

fn pom_prompt(class_name: &str, payload: &str) -> String {
    format!(
        r#"Create a Playwright Page Object Model in TypeScript.
Class: {class}Page
Data: {payload}
Rules:
1. import {{ type Page }} from "playwright/test";
2. export default class {class}Page.
3. Accept the page in the constructor and keep it as `readonly page: Page`.
4. Define selectors as readonly properties.
5. One async method per recorded step.
RETURN ONLY CODE."#,
        class = class_name,
        payload = payload
    )
}

fn spec_prompt(class_name: &str, title: &str, payload: &str) -> String {
    format!(
        r#"Create a Playwright test spec in TypeScript.
Data: {payload}
Rules:
1. import {{ test, expect }} from "playwright/test";
2. import {class}Page from '../pages/{class}Page';
3. test('{title}', async ({{ page }}) => {{ ... }});
4. Add a visual assertion: await expect(page).toHaveScreenshot();
RETURN ONLY CODE."#,
        class = class_name,
        title = title,
        payload = payload
    )
}

fn fixer_prompt(kind: ArtifactKind, code: &str, errors: &[String]) -> String {
    format!(
        r#"Fix this Playwright {kind} code. Fix only the reported errors and keep everything else unchanged.
ERRORS:
- {errors}
CODE:
{code}
RETURN ONLY FIXED TYPESCRIPT CODE."#,
        kind = kind,
        errors = errors.join("\n- "),
        code = code
    )
}

fn optimizer_prompt(kind: ArtifactKind, class_name: &str) -> String {
    match kind {
        ArtifactKind::Pom => format!(
            r#"You are a Senior Playwright Architect. Refactor the following Page Object Model (TypeScript).
Class Name: {class}Page
OPTIMIZATION GOALS:
1. SEMANTIC LOCATORS: Replace brittle CSS with getByRole, getByPlaceholder, getByText where possible.
2. STRICT TYPING: Use 'readonly locator: Locator' for all elements.
3. CLEAN CONSTRUCTOR: Initialize locators inside the constructor.
4. READABILITY: Use descriptive method names.
5. CLEANUP: Remove unused imports, console.logs, and commented code.
RETURN ONLY THE OPTIMIZED TYPESCRIPT CODE. NO MARKDOWN."#,
            class = class_name
        ),
        ArtifactKind::Spec => r#"You are a Senior SDET. Refactor the following Playwright Test Spec (TypeScript).
OPTIMIZATION GOALS:
1. NO HARD WAITS: Delete waitForTimeout, sleep, or setTimeout. Use await expect().toBeVisible() instead.
2. ISOLATION: Keep tests independent.
3. BEST PRACTICES: Use test.step blocks if the test is long.
4. ASSERTIONS: Keep await expect(page).toHaveScreenshot() if a visual check is implied.
5. CLEANUP: Remove redundant comments.
RETURN ONLY THE OPTIMIZED TYPESCRIPT CODE. NO MARKDOWN."#
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use qaforge_test_utils::{MemorySink, ScriptedResponder, ScriptedValidator};

    use crate::pipeline::context::RecordedAction;
    use crate::validator::PlaywrightValidator;

    const POM: &str = "export default class LoginPage {\n  readonly page: Page;\n}";
    const SPEC: &str = "import { test, expect } from \"playwright/test\";\nimport LoginPage from '../pages/LoginPage';\ntest('login', async ({ page }) => { await page.goto('/'); });";

    fn recorded_context(test_name: &str) -> WorkflowContext {
        let mut ctx = WorkflowContext::new();
        ctx.test_name = test_name.to_string();
        ctx.recorded_history.push(RecordedAction {
            action: "navigate".into(),
            params: serde_json::json!({"url": "https://shop.test"})
                .as_object()
                .cloned()
                .unwrap(),
            description: "Open the shop".into(),
        });
        ctx
    }

    #[test]
    fn test_strip_code_fences_with_language() {
        assert_eq!(strip_code_fences("```typescript\nconst a = 1;\n```"), "const a = 1;");
        assert_eq!(strip_code_fences("Here you go:\n```ts\nx();\n```\nEnjoy"), "x();");
    }

    #[test]
    fn test_strip_code_fences_single_line() {
        assert_eq!(
            strip_code_fences("```export default class LoginPage {}```"),
            "export default class LoginPage {}"
        );
        assert_eq!(
            strip_code_fences("```import x from 'y';\nx();\n```"),
            "import x from 'y';\nx();"
        );
        assert_eq!(strip_code_fences("```\nbare();\n```"), "bare();");
    }

    #[test]
    fn test_strip_code_fences_unterminated_and_plain() {
        assert_eq!(strip_code_fences("```ts\nx();"), "x();");
        assert_eq!(strip_code_fences("  plain();  "), "plain();");
    }

    #[test]
    fn test_pom_class_name() {
        assert_eq!(pom_class_name("login_flow"), "LoginFlow");
        assert_eq!(pom_class_name("Login"), "Login");
        assert_eq!(pom_class_name("2fa_setup"), "Test2faSetup");
        assert_eq!(pom_class_name("__"), "Generated");
    }

    #[test]
    fn test_prompts_carry_names() {
        assert!(pom_prompt("Login", "{}").contains("class LoginPage"));
        let spec = spec_prompt("Login", "login", "{}");
        assert!(spec.contains("import LoginPage from '../pages/LoginPage'"));
        assert!(spec.contains("test('login'"));
        let fix = fixer_prompt(ArtifactKind::Spec, "code()", &["e1".into(), "e2".into()]);
        assert!(fix.contains("- e1\n- e2"));
        assert!(fix.contains("Fix only the reported errors"));
    }

    #[tokio::test]
    async fn test_pom_skipped_without_recorded_actions() {
        let responder = Arc::new(ScriptedResponder::new());
        let sink = Arc::new(MemorySink::new());
        let services = NodeServices::new(
            responder.clone(),
            Arc::new(ScriptedValidator::new()),
            sink.clone(),
        );

        let mut ctx = WorkflowContext::new();
        PomGenerator::new("pages").run(&mut ctx, &services).await.unwrap();
        assert!(ctx.pom_class_name.is_none());
        assert_eq!(responder.call_count(), 0);
        assert_eq!(sink.write_count(), 0);
    }

    #[tokio::test]
    async fn test_pom_written_with_class_name() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![Intent::text(format!(
            "```typescript\n{}\n```",
            POM
        ))]));
        let sink = Arc::new(MemorySink::new());
        let services = NodeServices::new(responder.clone(), Arc::new(PlaywrightValidator), sink.clone());

        let mut ctx = recorded_context("login");
        PomGenerator::new("pages").run(&mut ctx, &services).await.unwrap();

        let path = PathBuf::from("pages/LoginPage.ts");
        assert_eq!(ctx.pom_class_name.as_deref(), Some("Login"));
        assert_eq!(ctx.pom_path.as_deref(), Some(path.as_path()));
        assert_eq!(sink.get(&path).as_deref(), Some(POM));
        assert_eq!(responder.call_count(), 1);
        assert!(responder.tool_counts().iter().all(|n| *n == 0));
    }

    #[tokio::test]
    async fn test_spec_skipped_without_pom() {
        let responder = Arc::new(ScriptedResponder::new());
        let services = NodeServices::new(
            responder.clone(),
            Arc::new(ScriptedValidator::new()),
            Arc::new(MemorySink::new()),
        );

        let mut ctx = recorded_context("login");
        SpecGenerator::new("specs").run(&mut ctx, &services).await.unwrap();
        assert!(ctx.spec_path.is_none());
        assert_eq!(responder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_one_failed_validation_means_one_fix() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![
            Intent::text("test('x', () => {})"),
            Intent::text(SPEC),
        ]));
        let sink = Arc::new(MemorySink::new());
        let services = NodeServices::new(responder.clone(), Arc::new(PlaywrightValidator), sink.clone());

        let mut ctx = recorded_context("login");
        ctx.pom_class_name = Some("Login".into());
        SpecGenerator::new("specs").run(&mut ctx, &services).await.unwrap();

        assert_eq!(responder.call_count(), 2);
        let fix_request = &responder.histories()[1][0].content;
        assert!(fix_request.contains("Missing import for LoginPage"));

        let path = PathBuf::from("specs/login.spec.ts");
        assert_eq!(ctx.spec_path.as_deref(), Some(path.as_path()));
        let written = sink.get(&path).unwrap();
        assert!(written.contains("LoginPage"));
        assert!(PlaywrightValidator.validate_spec(&written, "Login").valid);
    }

    #[tokio::test]
    async fn test_second_failure_keeps_degraded_artifact() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![
            Intent::text("bad one"),
            Intent::text("bad two"),
        ]));
        let validator = Arc::new(ScriptedValidator::new().reject(&["e1"]).reject(&["e2"]));
        let sink = Arc::new(MemorySink::new());
        let services = NodeServices::new(responder.clone(), validator.clone(), sink.clone());

        let mut ctx = recorded_context("login");
        PomGenerator::new("pages").run(&mut ctx, &services).await.unwrap();

        assert!(!ctx.failed);
        assert_eq!(responder.call_count(), 2);
        assert_eq!(validator.call_count(), 2);
        assert_eq!(
            sink.get(Path::new("pages/LoginPage.ts")).as_deref(),
            Some("bad two")
        );
    }

    #[tokio::test]
    async fn test_optimizer_overwrites_only_valid_code() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![Intent::text(POM)]));
        let optimizer = Arc::new(ScriptedResponder::with_intents(vec![Intent::text(
            "export default class LoginPage {\n  constructor(private page: Page) {}\n}",
        )]));
        let sink = Arc::new(MemorySink::new());
        let services = NodeServices::new(responder, Arc::new(PlaywrightValidator), sink.clone())
            .with_optimizer(optimizer.clone());

        let mut ctx = recorded_context("login");
        PomGenerator::new("pages").run(&mut ctx, &services).await.unwrap();

        assert_eq!(optimizer.call_count(), 1);
        let written = sink.get(Path::new("pages/LoginPage.ts")).unwrap();
        assert!(written.contains("private page"));
        assert_eq!(sink.write_count(), 2);
    }

    #[tokio::test]
    async fn test_optimizer_failure_is_ignored() {
        let responder = Arc::new(ScriptedResponder::with_intents(vec![Intent::text(POM)]));
        let optimizer = Arc::new(ScriptedResponder::new());
        optimizer.push(Intent::text("not a page object"));
        let sink = Arc::new(MemorySink::new());
        let services = NodeServices::new(responder, Arc::new(PlaywrightValidator), sink.clone())
            .with_optimizer(optimizer);

        let mut ctx = recorded_context("login");
        PomGenerator::new("pages").run(&mut ctx, &services).await.unwrap();

        assert!(!ctx.failed);
        assert_eq!(sink.get(Path::new("pages/LoginPage.ts")).as_deref(), Some(POM));
        assert_eq!(sink.write_count(), 1);
    }
}
