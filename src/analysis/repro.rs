//! Playwright reproduction scripts from a session's event log.

use std::fmt::Write;

use crate::events::{ClickMeta, EventPayload, TelemetryEvent, TriggerType};

const HEADER: &str = "import { test, expect } from '@playwright/test';\n\n\
test('repro friction incident', async ({ page }) => {\n";
const FOOTER: &str = "});";

/// Clicks replayed for a rage-click step.
const RAGE_REPLAY_CLICKS: usize = 5;

/// Escape a value for a single-quoted JS string literal.
fn js_str(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn click_step(script: &mut String, meta: &ClickMeta) {
    if let Some(test_id) = non_empty(meta.test_id.as_deref()) {
        let _ = writeln!(script, "  await page.getByTestId('{}').click();", js_str(test_id));
    } else if let Some(id) = non_empty(meta.id.as_deref()) {
        let _ = writeln!(script, "  await page.locator('#{}').click();", js_str(id));
    } else if let Some(text) = non_empty(meta.text.as_deref()) {
        let _ = writeln!(script, "  await page.getByText('{}').click();", js_str(text));
    } else {
        let x = meta.x.unwrap_or(0.0);
        let y = meta.y.unwrap_or(0.0);
        let _ = writeln!(script, "  // Ambiguous click at ({}, {})", x, y);
        let _ = writeln!(script, "  await page.mouse.click({}, {});", x, y);
    }
}

/// Turn an ordered event log into a runnable Playwright test.
///
/// Output depends only on the events and `base_url`. Event types without a
/// replay step are skipped; an empty log yields a scaffold with an empty body.
pub fn generate_repro_script(events: &[TelemetryEvent], base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    let mut script = String::from(HEADER);

    if !events.is_empty() {
        script.push_str("  // Initial state\n");
    }

    for event in events {
        match &event.payload {
            EventPayload::Nav(meta) => {
                let path = meta.path.as_deref().unwrap_or(&event.page);
                let _ = writeln!(script, "  await page.goto('{}{}');", base_url, js_str(path));
            }
            EventPayload::Click(meta) => click_step(&mut script, meta),
            EventPayload::FrictionDetected(friction) => {
                let _ = writeln!(script, "  // FRICTION DETECTED: {}", friction.trigger_type);
                if friction.trigger_type == TriggerType::RageClick {
                    let selector = non_empty(friction.selector.as_deref()).unwrap_or("body");
                    script.push_str("  // Simulating rage clicks\n");
                    let _ = writeln!(script, "  for (let i = 0; i < {}; i++) {{", RAGE_REPLAY_CLICKS);
                    let _ = writeln!(
                        script,
                        "    await page.locator('{}').click({{ delay: 50 }});",
                        js_str(selector)
                    );
                    script.push_str("  }\n");
                }
            }
            EventPayload::GoalComplete(_) => {
                script.push_str("  // Goal Complete\n");
                script.push_str("  expect(await page.content()).toContain('Success');\n");
            }
            _ => {}
        }
    }

    script.push_str(FOOTER);
    script
}
