use std::sync::Arc;

use chat_continuation::prelude::*;
use chat_continuation::vendors::openai_compat::OpenAiCompatProvider;
use tokio::sync::mpsc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    chat_continuation::init_observability();

    let backend = Arc::new(OpenAiCompatProvider::from_env()?);
    let config = ConversationConfig::new(ModelRef::new("openai-compat", "deepseek-chat"))
        .continuation(ContinuationConfig::from_env()?);
    let mut conversation = Conversation::new(backend, config)?;

    let (mut tx, mut rx) = mpsc::channel::<Chunk>(64);
    let printer = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::TextDelta { delta, .. } => print!("{delta}"),
                Chunk::Finish { finish_reason } => println!("\n-- finish: {finish_reason:?}"),
                Chunk::Error { error_text } => eprintln!("\nerror: {error_text}"),
                _ => {}
            }
        }
    });

    let reports = conversation
        .send_with_continuations(
            "Compare the five largest cloud providers in a detailed table.",
            &mut tx,
        )
        .await?;
    drop(tx);
    let _ = printer.await;

    for report in &reports {
        println!("turn {}: {:?}", report.turn_id, report.decision);
    }
    Ok(())
}
