use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use rkllm::{InferMode, InferParameters, LoraAdapter, ModelParameters, PromptCacheParameters};

use crate::util;

/// The chat template of DeepSeek-R1 distilled models, which the demo targets by default.
pub const DEFAULT_PROMPT_PREFIX: &str = "<｜begin▁of▁sentence｜><｜User｜>";
/// See [DEFAULT_PROMPT_PREFIX].
pub const DEFAULT_PROMPT_POSTFIX: &str = "<｜Assistant｜>";

/// Where the hidden layer is written when `--hidden-layer-dump` is given without a path.
pub const DEFAULT_HIDDEN_LAYER_PATH: &str = "last_hidden_layer.bin";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
/// Chat with a model running on the rkllm runtime.
///
/// Type a question, or the number of one of the preset questions, at the `user:` prompt.
/// Type `exit` (or press Ctrl-D) to quit.
pub struct Args {
    /// The `.rkllm` model to load
    pub model_path: PathBuf,

    /// The maximum number of tokens to generate per answer
    pub max_new_tokens: usize,

    /// The size of the context window, in tokens
    pub max_context_len: usize,

    #[command(flatten)]
    pub generate: Generate,

    #[command(flatten)]
    pub prompt: Prompt,

    #[command(flatten)]
    pub lora: Lora,

    #[command(flatten)]
    pub prompt_cache: PromptCache,

    /// Instead of generating, dump the last hidden layer for each input to the given file.
    /// A path must be attached with `=`, as in `--hidden-layer-dump=out.bin`.
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = DEFAULT_HIDDEN_LAYER_PATH
    )]
    pub hidden_layer_dump: Option<PathBuf>,
}
impl Args {
    pub fn model_parameters(&self) -> ModelParameters {
        let generate = &self.generate;
        ModelParameters {
            top_k: generate.top_k,
            top_p: generate.top_p,
            temperature: generate.temperature,
            repeat_penalty: generate.repeat_penalty,
            frequency_penalty: generate.frequency_penalty,
            presence_penalty: generate.presence_penalty,
            skip_special_token: !generate.keep_special_tokens,
            base_domain_id: generate.base_domain_id,
            ..ModelParameters::new(&self.model_path, self.max_new_tokens, self.max_context_len)
        }
    }

    pub fn infer_parameters(&self) -> InferParameters {
        InferParameters {
            mode: if self.hidden_layer_dump.is_some() {
                InferMode::LastHiddenLayer
            } else {
                InferMode::Generate
            },
            lora: self.lora.adapter().map(|adapter| adapter.name),
            prompt_cache: self
                .prompt_cache
                .save_prompt_cache
                .clone()
                .map(|path| PromptCacheParameters { path, save: true }),
        }
    }
}

#[derive(Parser, Debug)]
pub struct Generate {
    /// Top-K: The top K words by score are kept during sampling.
    #[arg(long, default_value_t = 1)]
    pub top_k: usize,

    /// Top-p: The cumulative probability after which no more words are kept
    /// for sampling.
    #[arg(long, default_value_t = 0.95)]
    pub top_p: f32,

    /// Temperature
    #[arg(long, default_value_t = 0.80)]
    pub temperature: f32,

    /// The penalty for repeating tokens. Higher values make the generation less
    /// likely to get into a loop, but may harm results when repetitive outputs
    /// are desired.
    #[arg(long, default_value_t = 1.10)]
    pub repeat_penalty: f32,

    /// Penalize tokens in proportion to how often they have already been generated.
    #[arg(long, default_value_t = 0.0)]
    pub frequency_penalty: f32,

    /// Penalize tokens that have already been generated at all.
    #[arg(long, default_value_t = 0.0)]
    pub presence_penalty: f32,

    /// Keep special tokens (such as end-of-turn markers) in the generated text.
    #[arg(long, default_value_t = false)]
    pub keep_special_tokens: bool,

    /// The IOMMU domain to load the model into. Only needed when running several
    /// models side by side.
    #[arg(long, default_value_t = 0)]
    pub base_domain_id: i32,
}

#[derive(Parser, Debug)]
pub struct Prompt {
    /// Text inserted before every user message.
    #[arg(long, default_value = DEFAULT_PROMPT_PREFIX)]
    pub prompt_prefix: String,

    /// Text inserted after every user message.
    #[arg(long, default_value = DEFAULT_PROMPT_POSTFIX)]
    pub prompt_postfix: String,

    /// A file to read a prompt template from. `{{PROMPT}}` is replaced with the
    /// user message. Overrides `--prompt-prefix` and `--prompt-postfix`.
    #[arg(long, short = 'f', default_value = None)]
    pub prompt_file: Option<PathBuf>,

    /// Send user messages to the model verbatim, without any template.
    #[arg(long, default_value_t = false, conflicts_with = "prompt_file")]
    pub raw: bool,
}
impl Prompt {
    pub fn style(&self) -> Result<PromptStyle> {
        if self.raw {
            return Ok(PromptStyle::Raw);
        }

        match &self.prompt_file {
            Some(path) => {
                let mut template = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("Could not read prompt file at {path:?}"))?;
                // Strip a single trailing newline (and carriage return) left by editors.
                if template.ends_with('\n') {
                    template.pop();
                }
                if template.ends_with('\r') {
                    template.pop();
                }
                Ok(PromptStyle::Template(template))
            }
            None => Ok(PromptStyle::Wrap {
                prefix: self.prompt_prefix.clone(),
                postfix: self.prompt_postfix.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// How a user message is turned into the prompt sent to the model.
pub enum PromptStyle {
    Raw,
    Wrap { prefix: String, postfix: String },
    Template(String),
}
impl PromptStyle {
    pub fn apply(&self, message: &str) -> String {
        match self {
            PromptStyle::Raw => message.to_owned(),
            PromptStyle::Wrap { prefix, postfix } => format!("{prefix}{message}{postfix}"),
            PromptStyle::Template(template) => util::process_prompt(template, message),
        }
    }
}

#[derive(Parser, Debug)]
pub struct Lora {
    /// LoRA adapter to load on top of the model
    #[arg(long = "lora", value_name = "PATH")]
    pub lora_path: Option<PathBuf>,

    /// The name to register the LoRA adapter under. Defaults to the file stem.
    #[arg(long, requires = "lora_path")]
    pub lora_name: Option<String>,

    /// Scaling to apply to the LoRA adapter
    #[arg(long, default_value_t = 1.0)]
    pub lora_scale: f32,
}
impl Lora {
    pub fn adapter(&self) -> Option<LoraAdapter> {
        let path = self.lora_path.clone()?;
        let name = self.lora_name.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "lora".to_string())
        });
        Some(LoraAdapter {
            path,
            name,
            scale: self.lora_scale,
        })
    }
}

#[derive(Parser, Debug)]
pub struct PromptCache {
    /// Loads a prompt cache from the given path, previously saved using
    /// `--save-prompt-cache`
    #[arg(long, default_value = None)]
    pub load_prompt_cache: Option<PathBuf>,

    /// Saves the prompt cache of every run at the given path.
    #[arg(long, default_value = None)]
    pub save_prompt_cache: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("rkllm-chat").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn positional_arguments_are_required() {
        let err = Args::try_parse_from(["rkllm-chat", "model.rkllm", "512"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn defaults_match_the_demo() {
        let args = parse(&["model.rkllm", "2048", "4096"]);
        let params = args.model_parameters();

        assert_eq!(params, ModelParameters::new("model.rkllm", 2048, 4096));
        assert_eq!(args.infer_parameters(), InferParameters::default());
        assert_eq!(
            args.prompt.style().unwrap(),
            PromptStyle::Wrap {
                prefix: DEFAULT_PROMPT_PREFIX.to_string(),
                postfix: DEFAULT_PROMPT_POSTFIX.to_string(),
            }
        );
    }

    #[test]
    fn sampling_flags_override_defaults() {
        let args = parse(&[
            "model.rkllm",
            "256",
            "1024",
            "--top-k",
            "40",
            "--temperature",
            "0.3",
            "--keep-special-tokens",
            "--base-domain-id",
            "1",
        ]);
        let params = args.model_parameters();

        assert_eq!(params.top_k, 40);
        assert_eq!(params.temperature, 0.3);
        assert!(!params.skip_special_token);
        assert_eq!(params.base_domain_id, 1);
        assert_eq!(params.top_p, 0.95);
    }

    #[test]
    fn hidden_layer_dump_defaults_its_path() {
        let args = parse(&["model.rkllm", "1", "1", "--hidden-layer-dump"]);
        assert_eq!(
            args.hidden_layer_dump.as_deref(),
            Some(std::path::Path::new(DEFAULT_HIDDEN_LAYER_PATH))
        );
        assert_eq!(args.infer_parameters().mode, InferMode::LastHiddenLayer);

        let args = parse(&["model.rkllm", "1", "1", "--hidden-layer-dump=out.bin"]);
        assert_eq!(
            args.hidden_layer_dump.as_deref(),
            Some(std::path::Path::new("out.bin"))
        );
    }

    #[test]
    fn hidden_layer_dump_before_positionals_takes_no_value() {
        let args = parse(&["--hidden-layer-dump", "model.rkllm", "512", "4096"]);
        assert_eq!(args.model_path, std::path::Path::new("model.rkllm"));
        assert_eq!(args.max_new_tokens, 512);
        assert_eq!(args.max_context_len, 4096);
        assert_eq!(
            args.hidden_layer_dump.as_deref(),
            Some(std::path::Path::new(DEFAULT_HIDDEN_LAYER_PATH))
        );
    }

    #[test]
    fn lora_name_defaults_to_file_stem() {
        let args = parse(&[
            "model.rkllm",
            "1",
            "1",
            "--lora",
            "adapters/qwen0.5b_fp16_lora.rkllm",
        ]);
        let adapter = args.lora.adapter().unwrap();
        assert_eq!(adapter.name, "qwen0.5b_fp16_lora");
        assert_eq!(adapter.scale, 1.0);
        assert_eq!(
            args.infer_parameters().lora.as_deref(),
            Some("qwen0.5b_fp16_lora")
        );

        let args = parse(&[
            "model.rkllm",
            "1",
            "1",
            "--lora",
            "knowledge.gguf",
            "--lora-name",
            "knowledge_old",
        ]);
        assert_eq!(args.lora.adapter().unwrap().name, "knowledge_old");
    }

    #[test]
    fn lora_name_requires_an_adapter() {
        let err = Args::try_parse_from([
            "rkllm-chat",
            "model.rkllm",
            "1",
            "1",
            "--lora-name",
            "knowledge_old",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn save_prompt_cache_is_forwarded_to_runs() {
        let args = parse(&[
            "model.rkllm",
            "1",
            "1",
            "--save-prompt-cache",
            "./prompt_cache.bin",
        ]);
        assert_eq!(
            args.infer_parameters().prompt_cache,
            Some(PromptCacheParameters {
                path: "./prompt_cache.bin".into(),
                save: true,
            })
        );
    }

    #[test]
    fn prompt_styles_apply() {
        let wrap = PromptStyle::Wrap {
            prefix: "<user>".to_string(),
            postfix: "<bot>".to_string(),
        };
        assert_eq!(wrap.apply("hi"), "<user>hi<bot>");
        assert_eq!(PromptStyle::Raw.apply("hi"), "hi");
        assert_eq!(
            PromptStyle::Template("Q: {{PROMPT}}\nA:".to_string()).apply("hi"),
            "Q: hi\nA:"
        );
    }

    #[test]
    fn prompt_file_becomes_a_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.txt");
        std::fs::write(&path, "<|im_start|>user\n{{PROMPT}}<|im_end|>\n").unwrap();

        let args = parse(&["model.rkllm", "1", "1", "-f", path.to_str().unwrap()]);
        assert_eq!(
            args.prompt.style().unwrap(),
            PromptStyle::Template("<|im_start|>user\n{{PROMPT}}<|im_end|>".to_string())
        );
    }

    #[test]
    fn raw_conflicts_with_prompt_file() {
        let err = Args::try_parse_from([
            "rkllm-chat",
            "model.rkllm",
            "1",
            "1",
            "--raw",
            "-f",
            "template.txt",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
