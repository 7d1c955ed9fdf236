/// Session Scoring - Composite Report
///
/// Pure fold over a recorded session: final correctness, how the candidate
/// iterated (process signals) and how they used the assistant (AI adoption
/// signals). Nothing here mutates the history; the same history always
/// yields the same report.

use chrono::{DateTime, Utc};
use gradebox_common::types::{
    AiAdoptionSignals, ChatMessage, ChatRole, EventType, ProcessSignals, SessionEvent,
    SessionHistory, SessionScore, TestRunRecord,
};
use tracing::{debug, instrument};

/// Substrings that mark a message as asking for an implementation.
const CODE_REQUEST_VOCABULARY: [&str; 5] = ["write", "implement", "code", "function", "create"];

/// Compute the composite report for one session.
#[instrument(
    skip_all,
    fields(
        events = history.events.len(),
        chat_messages = history.chat_messages.len(),
        test_runs = history.test_runs.len()
    )
)]
pub fn compute_score(history: &SessionHistory) -> SessionScore {
    let events = sorted_by_time(&history.events, |e| e.timestamp);
    let messages = sorted_by_time(&history.chat_messages, |m| m.timestamp);
    let test_runs = sorted_by_time(&history.test_runs, |r| r.timestamp);

    let score = SessionScore {
        correctness: correctness(&test_runs),
        process_signals: process_signals(&events),
        ai_adoption_signals: ai_adoption_signals(&messages, first_test_run_at(&events)),
    };

    debug!(
        correctness = score.correctness,
        test_run_count = score.process_signals.test_run_count,
        total_messages = score.ai_adoption_signals.total_messages,
        "Session scored"
    );

    score
}

/// Borrowed view in timestamp order. The sort is stable so records sharing
/// a timestamp keep their input order.
fn sorted_by_time<T>(items: &[T], key: impl Fn(&T) -> DateTime<Utc>) -> Vec<&T> {
    let mut view: Vec<&T> = items.iter().collect();
    view.sort_by_key(|item| key(*item));
    view
}

fn correctness(test_runs: &[&TestRunRecord]) -> f64 {
    test_runs.last().map(|run| run.score).unwrap_or(0.0)
}

fn first_test_run_at(events: &[&SessionEvent]) -> Option<DateTime<Utc>> {
    events
        .iter()
        .find(|e| e.kind == EventType::TestRun)
        .map(|e| e.timestamp)
}

fn process_signals(events: &[&SessionEvent]) -> ProcessSignals {
    let count = |kind: EventType| events.iter().filter(|e| e.kind == kind).count();

    let test_run_times: Vec<DateTime<Utc>> = events
        .iter()
        .filter(|e| e.kind == EventType::TestRun)
        .map(|e| e.timestamp)
        .collect();

    let time_to_first_test_run = match (events.first(), test_run_times.first()) {
        (Some(start), Some(first_run)) => {
            Some((*first_run - start.timestamp).num_milliseconds())
        }
        _ => None,
    };

    // Cursor over {change, test_run} only; other events leave it untouched
    let mut edit_test_cycles = 0;
    let mut last_significant: Option<EventType> = None;
    for event in events {
        match event.kind {
            EventType::TestRun => {
                if last_significant == Some(EventType::Change) {
                    edit_test_cycles += 1;
                }
                last_significant = Some(EventType::TestRun);
            }
            EventType::Change => last_significant = Some(EventType::Change),
            _ => {}
        }
    }

    let avg_time_between_test_runs = if test_run_times.len() > 1 {
        let total_gap_ms: i64 = test_run_times
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_milliseconds())
            .sum();
        Some(total_gap_ms as f64 / (test_run_times.len() - 1) as f64)
    } else {
        None
    };

    ProcessSignals {
        total_editor_changes: count(EventType::Change),
        test_run_count: test_run_times.len(),
        time_to_first_test_run,
        edit_test_cycles,
        paste_events: count(EventType::Paste),
        avg_time_between_test_runs,
    }
}

fn is_code_request(content: &str) -> bool {
    let lower = content.to_lowercase();
    CODE_REQUEST_VOCABULARY
        .iter()
        .any(|word| lower.contains(word))
}

fn ai_adoption_signals(
    messages: &[&ChatMessage],
    first_test_run: Option<DateTime<Utc>>,
) -> AiAdoptionSignals {
    let user_messages: Vec<&ChatMessage> = messages
        .iter()
        .copied()
        .filter(|m| m.role == ChatRole::User)
        .collect();

    // Length in Unicode scalar values, not UTF-16 code units: an emoji
    // counts as one character, not two.
    let avg_prompt_length = if user_messages.is_empty() {
        0
    } else {
        let total_chars: usize = user_messages.iter().map(|m| m.content.chars().count()).sum();
        (total_chars as f64 / user_messages.len() as f64).round() as u64
    };

    let messages_before_first_test_run = user_messages
        .iter()
        .filter(|m| match first_test_run {
            Some(first) => m.timestamp < first,
            None => true,
        })
        .count();

    AiAdoptionSignals {
        total_messages: user_messages.len(),
        avg_prompt_length,
        questions_asked: user_messages.iter().filter(|m| m.content.contains('?')).count(),
        code_request_count: user_messages.iter().filter(|m| is_code_request(&m.content)).count(),
        total_tokens_used: messages.iter().map(|m| m.tokens_used).sum(),
        messages_before_first_test_run,
        messages_after_first_test_run: user_messages.len() - messages_before_first_test_run,
    }
}
