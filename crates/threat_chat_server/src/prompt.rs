//! System prompt augmentation.

use threat_chat_client::{Message, Role};

/// Base instruction given to the model for every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a highly knowledgeable and experienced cybersecurity expert. Your goal is to provide precise, practical, and current insights tailored to user queries.

Your expertise spans:
- Threat intelligence, malware analysis, and incident response
- Network security, cryptography, and penetration testing
- Cyber risk assessment, compliance (GDPR, NIST, ISO 27001), and governance

Instructions:
- Use clear, concise language; avoid jargon unless technical depth is requested
- Incorporate recent cybersecurity events, breaches, CVEs, or research papers when relevant
- Offer best practices, mitigation strategies, and actionable advice
- If real-time data is needed, suggest reputable sources (e.g., CISA, MITRE, NVD)

Always prioritize clarity, relevance, and value.";

/// Heading placed between the base instruction and retrieved snippets.
pub const CONTEXT_HEADING: &str = "Consider the following threat intelligence insights:";

/// Base instruction, followed by a numbered list of `snippets` when any exist.
pub fn inject_context(base: &str, snippets: &[String]) -> String {
    if snippets.is_empty() {
        return base.to_string();
    }
    let listed = snippets
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n\n{}\n{}", base, CONTEXT_HEADING, listed)
}

/// Copy of `messages` carrying exactly one system message with `system_text`.
///
/// The first existing system message is replaced where it stands and any
/// later ones are dropped; with none present the new one goes first.
pub fn with_system_message(messages: &[Message], system_text: &str) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    let mut placed = false;
    for msg in messages {
        if msg.role == Role::System {
            if !placed {
                out.push(Message::system(system_text));
                placed = true;
            }
            continue;
        }
        out.push(msg.clone());
    }
    if !placed {
        out.insert(0, Message::system(system_text));
    }
    out
}
