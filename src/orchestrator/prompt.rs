use std::fmt::Write;

use crate::capability::CapabilityRegistry;
use crate::config::PersonaConfig;
use crate::llm::Turn;

/// Control sequences that would let user text impersonate a chat turn.
const TEMPLATE_TOKENS: [&str; 8] = [
    "<|im_start|>",
    "<|im_end|>",
    "<|endoftext|>",
    "<|system|>",
    "<|user|>",
    "<|assistant|>",
    "<start_of_turn>",
    "<end_of_turn>",
];

pub fn build_system_instruction(persona: &PersonaConfig, registry: &CapabilityRegistry) -> String {
    let name = &persona.assistant_name;
    let platform = &persona.platform_name;

    let mut prompt = format!(
        "You are \"{name}\", an assistant for the {platform} platform. You help users \
         find projects, connect with collaborators, and get advice.\n\n\
         You have these capabilities:\n"
    );
    for schema in registry.schemas() {
        writeln!(prompt, "- `{}`: {}", schema.name, schema.description).ok();
    }
    prompt.push_str(
        "\nBroad or advisory questions about the platform itself are answered from \
         its knowledge base; reply in plain text for those and do not call a \
         capability.\n\n",
    );
    write!(
        prompt,
        "Rules:\n\
         1. Use the lookup capabilities for any request about specific, live \
            projects or people.\n\
         2. You are read-only. You cannot create, change, or delete anything.\n\
         3. Never answer questions about administrators, admin dashboards, \
            permissions, or other administrative functions. Say politely that \
            you have no access to that information.\n\
         4. Stay on {platform} and related technology topics. Politely decline \
            anything far outside that scope.\n\
         5. Private data (passwords, one-time codes, team tasks, project \
            messages) is never available to you.\n"
    )
    .ok();
    prompt
}

/// Example exchanges every conversation is seeded with.
pub fn few_shot_turns(persona: &PersonaConfig) -> Vec<Turn> {
    let platform = &persona.platform_name;
    vec![
        Turn::user("I'd like to start a project in healthcare technology."),
        Turn::model(format!(
            "Great area to work in! Health projects on {platform} usually need \
             React Native for the mobile app, Node.js for the backend, and Python \
             for any machine-learning features. Want me to look for members with \
             those skills?"
        )),
        Turn::user("Which skills matter most for a generative AI project?"),
        Turn::model(
            "Python is the core skill, usually with PyTorch or TensorFlow. Prompt \
             engineering and solid API integration matter just as much, since most \
             of these projects call a hosted model.",
        ),
        Turn::user("Can you show me the admin dashboard?"),
        Turn::model(
            "Sorry, I don't have access to administrative information or tools.",
        ),
    ]
}

/// Prompt for the one-shot follow-up after a lookup found nothing.
pub fn spelling_suggestion_prompt(query: &str) -> String {
    format!(
        "The user searched for '{query}', but the database returned no results. \
         Is there a likely spelling mistake in the query? If so, suggest the \
         correct spelling. If not, just say you couldn't find anything."
    )
}

pub fn build_context_block(snippets: &[String]) -> String {
    let mut ctx = String::from("Context from the platform's knowledge base:\n\n");
    if snippets.is_empty() {
        ctx.push_str("(No relevant context was found in the knowledge base.)\n");
    } else {
        for snippet in snippets {
            writeln!(ctx, "{}\n", sanitize_for_prompt(snippet)).ok();
        }
    }
    ctx
}

pub fn build_retrieval_prompt(context_block: &str, query: &str) -> String {
    format!(
        "Answer the user's question using the context below.\n\n\
         {context_block}---\nQuestion: {query}"
    )
}

/// Remove chat-template control tokens from untrusted text. Stripping
/// repeats until nothing changes, so nested tokens cannot reassemble.
pub fn sanitize_for_prompt(text: &str) -> String {
    let mut clean = text.to_string();
    loop {
        let before = clean.len();
        for token in TEMPLATE_TOKENS {
            if clean.contains(token) {
                clean = clean.replace(token, "");
            }
        }
        if clean.len() == before {
            return clean;
        }
    }
}

pub fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    s.char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= max_len)
        .map(|(_, c)| c)
        .collect()
}

/// Trim, bound, and sanitize a raw user query. Empty means "no question".
pub fn clean_query(raw: &str, max_len: usize) -> String {
    let bounded = truncate_to_char_boundary(raw.trim(), max_len);
    sanitize_for_prompt(&bounded).trim().to_string()
}
