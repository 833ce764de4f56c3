pub mod aggregator;
pub mod anthropic;
pub mod classifier;
pub mod extractor;
pub mod ledger;
pub mod llm;
pub mod openai;
pub mod processor;
pub mod prompts;
pub mod retry;
pub mod text_extraction;
pub mod validator;
