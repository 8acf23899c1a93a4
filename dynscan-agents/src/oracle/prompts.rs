//! Prompt builders for the three oracles.

use crate::contracts::{Action, StepLog};

pub struct IdentificationPrompt<'a> {
    pub instructions: &'a str,
}

pub struct ExplorationPrompt<'a> {
    pub instructions: &'a str,
    pub memory: &'a str,
    pub iteration: u32,
    pub planned_iterations: u32,
}

pub struct ReflectionPrompt<'a> {
    pub instructions: &'a str,
    pub action: &'a Action,
    pub expected_effect: &'a str,
}

pub fn identification(p: &IdentificationPrompt<'_>) -> String {
    format!(
        "User instructions: {}\n\
         You see the first screenshot of a freshly launched mobile app.\n\
         Identify what the app is and whether anything on screen is suspicious.\n\
         Return ONLY JSON:\n\
         {{\"risk_level\":\"high|low\",\"confidence\":float,\"reason\":\"...\"}}",
        p.instructions
    )
}

pub fn exploration(p: &ExplorationPrompt<'_>) -> String {
    let memory = if p.memory.trim().is_empty() {
        "(none yet)"
    } else {
        p.memory.trim()
    };
    format!(
        "User instructions: {}\n\
         Exploration step {} of about {}.\n\
         Insights so far:\n{}\n\
         You see a screenshot of the running app. Check for suspicious UI and pick the next action.\n\
         Possible actions: Tap(x,y), Swipe(x1,y1,x2,y2), Type(text), Back, Home, None.\n\
         Return ONLY JSON:\n\
         {{\"risk_level\":\"high|low\",\"confidence\":float,\"reason\":\"...\",\"action\":\"Tap(...)|Swipe(...)|Type(...)|Back|Home|None\"}}",
        p.instructions, p.iteration, p.planned_iterations, memory
    )
}

pub fn reflection(p: &ReflectionPrompt<'_>) -> String {
    format!(
        "User instructions: {}\n\
         The first image was taken before the action {} and the second after it.\n\
         Expected effect: {}\n\
         Did the action have the expected effect?\n\
         Return ONLY JSON:\n\
         {{\"status\":\"as_expected|unexpected_recoverable|unexpected_blocking\",\"risk_level\":\"low|high\",\"confidence\":float,\"explanation\":\"...\",\"insight\":\"...\"}}",
        p.instructions, p.action, p.expected_effect
    )
}

/// Aggregation prompt carrying every record as JSON.
pub fn aggregation(instructions: &str, records: &StepLog) -> Result<String, serde_json::Error> {
    let steps = serde_json::to_string(records)?;
    Ok(format!(
        "User instructions: {}\n\
         Below are the step records of a dynamic app analysis keyed by stage.\n\
         Produce the final verdict:\n\
         - copy every record into \"reasons\" unchanged, under its stage\n\
         - risk_level is high if any record is high, else low\n\
         - confidence is the weight-averaged confidence of the records\n\
         Return ONLY JSON:\n\
         {{\"risk_level\":\"high|low\",\"confidence\":float,\"reasons\":{{...}}}}\n\
         {}",
        instructions, steps
    ))
}

/// What a UI action should visibly do, for reflection.
pub fn expected_effect(action: &Action) -> String {
    match action {
        Action::Tap { x, y } => format!("the element at ({}, {}) responds to the tap", x, y),
        Action::Swipe { .. } => "the screen scrolls or changes page".to_string(),
        Action::Type { text } => format!("the text \"{}\" appears in the focused field", text),
        Action::Back => "the app returns to the previous screen".to_string(),
        Action::Home => "the device home screen is shown".to_string(),
        Action::None => "nothing changes".to_string(),
    }
}
