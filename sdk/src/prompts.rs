use chrono::{Duration, FixedOffset, Utc};

/// End-of-day reflection template, pointing the caller at the
/// `memories/{date}` resource for today (`service.py::reflect_on_day`).
pub fn reflect_on_day(offset: &FixedOffset) -> String {
    let today = Utc::now().with_timezone(offset).format("%Y-%m-%d").to_string();
    format!(
        "Please review my memory entries for today ({today}) by reading the kioku://memories/{today} resource.\n\
Then, provide a thoughtful end-of-day reflection that covers:\n\
1. The overall emotional tone of my day.\n\
2. The key events and entities I interacted with.\n\
3. A positive takeaway or lesson for tomorrow.\n\
\n\
Respond as a compassionate companion (my 'Kioku')."
    )
}

/// Relationship-analysis template, pointing the caller at the
/// `entities/{name}` resource (`service.py::analyze_relationships`).
pub fn analyze_relationships(entity_name: &str) -> String {
    format!(
        "Please use the kioku://entities/{entity_name} resource to read about '{entity_name}'.\n\
\n\
Analyze this entity's role in my life based on the knowledge graph:\n\
1. What is my primary emotional response surrounding this entity?\n\
2. Who or what else is frequently connected to this entity?\n\
3. What are some notable patterns in my memories involving {entity_name}?\n\
\n\
Write the analysis in a helpful, introspective tone."
    )
}

/// Weekly retrospective template listing the last 7 dates to check
/// (`service.py::weekly_review`).
pub fn weekly_review(offset: &FixedOffset) -> String {
    let today = Utc::now().with_timezone(offset);
    let days: Vec<String> = (0..7)
        .map(|i| (today - Duration::days(i)).format("%Y-%m-%d").to_string())
        .collect();
    let dates_list = days.join(", ");

    format!(
        "Please perform a weekly retrospective of my life over the past 7 days:\n\
\n\
Dates to check (using tools to read memory dates if resources aren't mapped):\n\
{dates_list}\n\
\n\
Please synthesize:\n\
- The highs and lows of the week based on 'mood' and events.\n\
- An overview of who I spent the most time with or thought about often.\n\
- Recommended focus areas for next week based on lingering tasks or stress points mentioned."
    )
}
