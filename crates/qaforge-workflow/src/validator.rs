use qaforge_core::traits::CodeValidator;
use qaforge_core::types::{ArtifactKind, ValidationReport};

/// Structural checks for generated Playwright TypeScript.
///
/// These are string-level checks, not a compiler: they catch the mistakes
/// models make most often (wrong class name, missing imports, no test block).
#[derive(Debug, Default, Clone)]
pub struct PlaywrightValidator;

impl PlaywrightValidator {
    pub fn new() -> Self {
        Self
    }

    /// `class_name` is the page object base name, e.g. `Login` for `LoginPage`.
    pub fn validate_pom(&self, code: &str, class_name: &str) -> ValidationReport {
        let mut errors = Vec::new();

        if !code.contains(&format!("class {}Page", class_name)) {
            errors.push(format!("SYNTAX ERROR: Expected 'class {}Page'", class_name));
        }

        if !code.contains("readonly page") && !code.contains("private page") {
            errors.push("LOGIC ERROR: Constructor must accept 'page'.".to_string());
        }

        ValidationReport::from_errors(errors)
    }

    pub fn validate_spec(&self, code: &str, pom_class_name: &str) -> ValidationReport {
        let mut errors = Vec::new();

        if !code.contains(r#"from "playwright/test""#)
            && !code.contains(r#"from "@playwright/test""#)
        {
            errors.push(
                r#"CRITICAL: Missing import { test, expect } from "playwright/test";"#.to_string(),
            );
        }

        if !code.contains(&format!("import {}Page from", pom_class_name)) {
            errors.push(format!("CRITICAL: Missing import for {}Page.", pom_class_name));
        }

        if !code.contains("test(") || !code.contains("await") {
            errors.push("SYNTAX ERROR: Missing valid test(...) block or async/await.".to_string());
        }

        ValidationReport::from_errors(errors)
    }
}

impl CodeValidator for PlaywrightValidator {
    fn validate(&self, kind: ArtifactKind, code: &str, class_name: &str) -> ValidationReport {
        match kind {
            ArtifactKind::Pom => self.validate_pom(code, class_name),
            ArtifactKind::Spec => self.validate_spec(code, class_name),
        }
    }
}
