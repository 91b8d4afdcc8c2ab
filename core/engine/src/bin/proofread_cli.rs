// src/bin/proofread_cli.rs

use std::sync::Arc;

use proofread_engine::{
    EngineConfig, ModelManager, OnnxSessionLoader, ProofreadService, Proofreader,
    StaticConfigManager,
};

fn main() {
    if let Err(e) = real_main() {
        eprintln!("proofread_cli error: {e}");
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    // Usage:
    //   proofread_cli <encoder.onnx> [decoder.onnx] [tokenizer.json] -- <text to correct>
    let args: Vec<String> = std::env::args().skip(1).collect();
    let split = args.iter().position(|a| a == "--");
    let (model_args, text_args) = match split {
        Some(idx) => (&args[..idx], &args[idx + 1..]),
        None => (&args[..1.min(args.len())], &args[1.min(args.len())..]),
    };

    let encoder_path = model_args
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("usage: proofread_cli <encoder.onnx> [decoder.onnx] [tokenizer.json] -- <text>"))?;
    let decoder_path = model_args.get(1).cloned();
    let tokenizer_path = model_args.get(2).cloned();

    let text = if text_args.is_empty() {
        "I has a apple".to_string()
    } else {
        text_args.join(" ")
    };

    let config = EngineConfig {
        encoder_path: Some(encoder_path),
        decoder_path,
        tokenizer_path,
        keep_model_loaded: true,
        ..EngineConfig::default()
    };
    let cache_dir = config.staging_dir();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let config_manager = Arc::new(StaticConfigManager::new(config));
        let manager = Arc::new(ModelManager::new(Arc::new(OnnxSessionLoader), cache_dir));
        let service = ProofreadService::new(config_manager, manager);

        let output = service.proofread(&text, None).await?;
        println!("{output}");
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}
