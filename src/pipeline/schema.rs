//! Instruction preamble and the structured-output function declaration.

use serde_json::json;

use crate::llm::ToolDefinition;

/// Name of the function the model is forced to call.
pub const FUNCTION_NAME: &str = "set_conversation_info";

/// Build the system prompt.
pub fn build_system_prompt(company_name: Option<&str>) -> String {
    let employer = match company_name {
        Some(name) => format!("You are a helpful assistant working for {name}."),
        None => "You are a helpful assistant working for a sales team.".to_string(),
    };
    format!(
        "{employer} When extracting useful information, try to imagine why someone might \
         find that piece of data useful. For example, providing a contact's email address is \
         probably not useful since that information is already displayed elsewhere."
    )
}

/// Build the user message embedding the transcript.
pub fn build_user_prompt(transcript: &str) -> String {
    format!(
        "Extract information from this conversation useful to a sales or support-person:\n{transcript}"
    )
}

/// The `set_conversation_info` declaration.
pub fn conversation_info_tool() -> ToolDefinition {
    let likelihood = json!(["never", "probably_not", "possibly", "likely", "almost_certain", "not_applicable"]);

    ToolDefinition {
        name: FUNCTION_NAME.to_string(),
        description: "Record structured facts about a sales or support conversation.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "is_relevant": {
                    "type": "boolean",
                    "description": "True if this thread is directly with someone who is a sales prospect. \
                        False for any other kind of conversation, such as those with investors, \
                        internal conversations, or introductions to other people."
                },
                "probability_to_close": {
                    "type": "string",
                    "description": "How likely it is that a successful deal will be closed with this prospect. \
                        If this is not a conversation with a prospective customer, use 'not_applicable'.",
                    "enum": likelihood
                },
                "probability_to_churn": {
                    "type": "string",
                    "description": "How likely it is that an existing customer will churn (leave, stop being a \
                        customer). If this is not a conversation with an existing customer, use 'not_applicable'.",
                    "enum": likelihood
                },
                "overview": {
                    "type": "string",
                    "description": "An overview of this conversation summarizing useful and relevant information."
                },
                "helpful_info": {
                    "type": "string",
                    "description": "Any real, truthful information that would be helpful to a salesperson who has \
                        the goal of closing this prospect, be as specific as possible. If you can't extract any \
                        sufficiently useful data, say 'none' instead of guessing."
                },
                "sentiment": {
                    "type": "string",
                    "description": "How is the subject of this conversation feeling about us?",
                    "enum": ["very negative", "negative", "neutral", "positive", "very positive"]
                },
                "customer_stage": {
                    "type": "string",
                    "description": "What stage of the sales funnel is this person in? If it's not extremely clear, \
                        report as unknown.",
                    "enum": ["reached_out", "heard_back", "meeting_scheduled", "intent_to_close", "closed", "unknown"]
                }
            },
            "required": [
                "is_relevant",
                "overview",
                "sentiment",
                "helpful_info",
                "customer_stage",
                "probability_to_close",
                "probability_to_churn"
            ]
        }),
    }
}
