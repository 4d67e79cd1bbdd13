//! Prompt composition for reply generation.

use replygen_embeddings::Match;

/// Separator between prompt sections.
const SECTION_BREAK: &str = "#####";

/// Build the instruction sent to the completion model.
///
/// Exemplars are quoted verbatim under `Example` headings; the new message
/// goes under a final `Tweet:` heading. Nothing is escaped.
pub fn compose(customer_message: &str, company: &str, exemplars: &[Match]) -> String {
    let mut prompt = format!(
        "You are a chatbot answering customer's tweet. You are working for a company called {company}.\n"
    );
    let guidance = match exemplars.len() {
        0 => "Reply to the customer's tweet politely and helpfully.".to_string(),
        1 => "You are provided with an example of a similar interaction between a customer and an agent. \
              Reply to the customer's tweet in the same tone, structure and style as the provided example."
            .to_string(),
        n => format!(
            "You are provided with {n} examples of similar interactions between a customer and an agent. \
             Reply to the customer's tweet in the same tone, structure and style as the provided examples."
        ),
    };
    prompt.push_str(&guidance);
    prompt.push('\n');

    for (position, exemplar) in exemplars.iter().enumerate() {
        let heading = if exemplars.len() == 1 {
            "Example :".to_string()
        } else {
            format!("Example {} :", position + 1)
        };
        prompt.push_str(&format!(
            "\n{SECTION_BREAK}\n{heading}\nCustomer : \"{}\"\nAgent : \"{}\"\n",
            exemplar.record.customer_message, exemplar.record.company_reply
        ));
    }

    prompt.push_str(&format!(
        "\n{SECTION_BREAK}\nTweet:\n\"{customer_message}\"\n"
    ));
    prompt
}
