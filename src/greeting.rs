use chrono::{Local, Timelike};
use rand::seq::SliceRandom;

const ANYTIME: &[&str] = &[
    "Thanks for calling{at_business}. This is {name}, how can I help you?",
    "Hi there, thanks for calling{at_business}. I'm {name}, what can I do for you?",
    "Hello, this is {name}. Thanks for calling{at_business}, how can I help today?",
];

const MORNING: &[&str] = &[
    "Good morning, thanks for calling{at_business}. This is {name}, how can I help?",
];

const AFTERNOON: &[&str] = &[
    "Good afternoon, thanks for calling{at_business}. I'm {name}, how can I help?",
];

const EVENING: &[&str] = &[
    "Good evening, thanks for calling{at_business}. This is {name}, how can I help?",
];

const NIGHT: &[&str] = &[
    "Thanks for calling{at_business}. This is {name}. We may be closed, but I can still help. \
     What do you need?",
];

fn time_pool(hour: u32) -> &'static [&'static str] {
    match hour {
        5..=11 => MORNING,
        12..=16 => AFTERNOON,
        17..=20 => EVENING,
        _ => NIGHT,
    }
}

/// Select a greeting based on the current time of day.
///
/// Combines anytime greetings with time-specific ones and picks randomly.
/// `{name}` becomes the assistant's name and `{at_business}` the business.
pub fn select_greeting(name: &str, business: Option<&str>) -> String {
    let hour = Local::now().hour();
    select_greeting_for_hour(name, business, hour)
}

fn select_greeting_for_hour(name: &str, business: Option<&str>, hour: u32) -> String {
    let time_specific = time_pool(hour);
    let mut pool: Vec<&str> = Vec::with_capacity(ANYTIME.len() + time_specific.len());
    pool.extend_from_slice(ANYTIME);
    pool.extend_from_slice(time_specific);

    let mut rng = rand::thread_rng();
    let template = pool.choose(&mut rng).unwrap_or(&ANYTIME[0]);
    let at_business = business.map(|b| format!(" {b}")).unwrap_or_default();
    template
        .replace("{at_business}", &at_business)
        .replace("{name}", name)
}

/// Greeting for a caller we already know by name.
pub fn returning_caller(caller_name: &str, name: &str, business: Option<&str>) -> String {
    match business {
        Some(b) => format!(
            "Welcome back to {b}, {caller_name}! It's {name}. How can I help you today?"
        ),
        None => format!("Welcome back, {caller_name}! It's {name}. How can I help you today?"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_contains_names() {
        for hour in [3, 9, 14, 19] {
            let greeting = select_greeting_for_hour("Clara", Some("Glow Salon"), hour);
            assert!(greeting.contains("Clara"), "missing assistant name: {greeting}");
            assert!(greeting.contains("Glow Salon"), "missing business: {greeting}");
        }
    }

    #[test]
    fn greeting_no_placeholder_leftover() {
        for hour in 0..24 {
            for business in [None, Some("Luigi's")] {
                let greeting = select_greeting_for_hour("Clara", business, hour);
                assert!(
                    !greeting.contains('{') && !greeting.contains('}'),
                    "placeholder not replaced at hour {hour}: {greeting}"
                );
            }
        }
    }

    #[test]
    fn greeting_without_business_reads_cleanly() {
        for hour in 0..24 {
            let greeting = select_greeting_for_hour("Clara", None, hour);
            assert!(!greeting.contains("  "), "double space at hour {hour}: {greeting}");
            assert!(!greeting.contains(" ."), "dangling space at hour {hour}: {greeting}");
        }
    }

    #[test]
    fn returning_caller_is_welcomed_by_name() {
        let text = returning_caller("Dana", "Clara", Some("Glow Salon"));
        assert_eq!(
            text,
            "Welcome back to Glow Salon, Dana! It's Clara. How can I help you today?"
        );
    }

    #[test]
    fn time_pool_boundaries() {
        assert_eq!(time_pool(4), NIGHT);
        assert_eq!(time_pool(5), MORNING);
        assert_eq!(time_pool(11), MORNING);
        assert_eq!(time_pool(12), AFTERNOON);
        assert_eq!(time_pool(16), AFTERNOON);
        assert_eq!(time_pool(17), EVENING);
        assert_eq!(time_pool(20), EVENING);
        assert_eq!(time_pool(21), NIGHT);
    }
}
