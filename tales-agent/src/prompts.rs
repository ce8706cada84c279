//! Prompt construction for the story narrator.

use completions::Message;

/// Most recent nodes included verbatim in a continuation prompt; older
/// content is summarized by count so prompts stay bounded.
const MAX_PRIOR_NODES: usize = 12;

/// System prompt shared by every narration request.
pub fn narrator_system_prompt() -> String {
    r#"You are the narrator of an on-chain interactive fiction game. Players read story passages and pick numbered branches; your passages are written permanently to the story, so deliver finished prose only.

## Your role
1. Continue the story from the passages you are given
2. Honor the branch the player picked
3. Keep a consistent tone, cast, and setting across passages

## Response style
- Two to four paragraphs of present-tense narration
- End at a natural decision point that invites the next choice
- No headings, no lists, no commentary about being an AI or about these instructions
- Never contradict earlier passages"#
        .to_string()
}

/// Messages for the opening passage of a brand-new story game.
pub fn opening_messages(title: &str, theme: Option<&str>) -> Vec<Message> {
    let theme_line = match theme {
        Some(theme) => format!("\nTheme: {theme}"),
        None => String::new(),
    };
    vec![
        Message::system(narrator_system_prompt()),
        Message::user(format!(
            r#"A new story game has been created.

Title: {title}{theme_line}

Write the opening passage. Introduce the protagonist and the situation, and end at the story's first decision point."#
        )),
    ]
}

/// Messages for continuing an existing story after a player choice.
pub fn continuation_messages(
    title: Option<&str>,
    prior_content: &[String],
    choice: u64,
) -> Vec<Message> {
    let mut story = String::new();
    if let Some(title) = title {
        story.push_str(&format!("Title: {title}\n\n"));
    }
    let skipped = prior_content.len().saturating_sub(MAX_PRIOR_NODES);
    if skipped > 0 {
        story.push_str(&format!("[{skipped} earlier passages omitted]\n\n"));
    }
    for (index, node) in prior_content.iter().enumerate().skip(skipped) {
        story.push_str(&format!("--- Passage {} ---\n{}\n\n", index + 1, node));
    }
    if prior_content.is_empty() {
        story.push_str("(The story has no passages yet.)\n\n");
    }

    vec![
        Message::system(narrator_system_prompt()),
        Message::user(format!(
            r#"Here is the story so far:

{story}The player has chosen branch {choice}.

Write the next passage, following the chosen branch."#
        )),
    ]
}
