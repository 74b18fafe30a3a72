//! Retrieval-query construction from learner context.
//!
//! Pure string assembly: an explicit query is preserved verbatim and
//! enriched with context hints; otherwise the query is composed from the
//! learner's topics, level, and goal, with a generic fallback when no
//! context exists.

use crate::models::LearnerContext;

const FALLBACK_QUERY: &str = "Recent articles about AI and machine learning";

/// Build the retrieval query text for a learner.
pub fn build_query(ctx: &LearnerContext, explicit: Option<&str>) -> String {
    if let Some(explicit) = explicit.map(str::trim).filter(|q| !q.is_empty()) {
        let mut parts = vec![explicit.to_string()];
        if !ctx.topics.is_empty() {
            let topics: Vec<&str> = ctx.topics.iter().take(3).map(String::as_str).collect();
            parts.push(format!(
                "Related to my current focus topics: {}.",
                topics.join(", ")
            ));
        }
        if !ctx.difficulty.is_empty() {
            parts.push(format!(
                "I'm at {} level, so match that depth.",
                ctx.difficulty
            ));
        }
        return parts.join(" ");
    }

    let mut parts = Vec::new();
    if !ctx.topics.is_empty() {
        parts.push(format!("I am currently studying {}.", join_topics(&ctx.topics)));
    }
    if !ctx.goal.is_empty() {
        parts.push(format!("My goal is to {}.", ctx.goal.trim_end_matches('.')));
    }
    if !ctx.difficulty.is_empty() {
        parts.push(format!(
            "Find recent material with {}-level depth.",
            ctx.difficulty
        ));
    }

    if parts.is_empty() {
        FALLBACK_QUERY.to_string()
    } else {
        parts.join(" ")
    }
}

fn join_topics(topics: &[String]) -> String {
    match topics {
        [] => String::new(),
        [single] => single.clone(),
        [init @ .., last] => format!(
            "{}, and {}",
            init.iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            last
        ),
    }
}
