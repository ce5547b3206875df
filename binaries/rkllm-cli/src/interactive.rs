use std::{
    io::{self, Write},
    ops::ControlFlow,
    path::Path,
};

use color_eyre::eyre::{self, WrapErr};
use rkllm::{Input, Llm, RkllmError, RunEvent};
use rustyline::{
    error::ReadlineError,
    history::DefaultHistory,
    validate::{ValidationContext, ValidationResult, Validator},
    Cmd, Completer, Helper, Highlighter, Hinter, KeyCode, KeyEvent, Modifiers,
};

use crate::{
    cli_args::{Args, PromptStyle, DEFAULT_HIDDEN_LAYER_PATH},
    util,
};

pub const EXIT_COMMAND: &str = "exit";

pub const PRESET_QUESTIONS: &[&str] = &[
    "Write a poem about snow",
    "Each boy plants 3 trees, and each girl plants 2 trees. The total number of people is 12, and the total number of trees is 32. Find the number of men and women.",
];

pub fn chat(args: &Args) -> eyre::Result<()> {
    let style = args.prompt.style()?;
    let mut infer_parameters = args.infer_parameters();
    let hidden_layer_path = args
        .hidden_layer_dump
        .as_deref()
        .unwrap_or(Path::new(DEFAULT_HIDDEN_LAYER_PATH));

    let mut llm = load_model(args)?;

    if let Some(adapter) = args.lora.adapter() {
        match llm.load_lora(&adapter) {
            Ok(()) => log::info!("Loaded LoRA adapter `{}`", adapter.name),
            Err(err) => {
                log::error!("{err}");
                infer_parameters.lora = None;
            }
        }
    }

    let prompt_cache_loaded = match &args.prompt_cache.load_prompt_cache {
        Some(path) => {
            llm.load_prompt_cache(path)
                .wrap_err("Could not load prompt cache")?;
            log::info!("Loaded prompt cache from {path:?}");
            true
        }
        None => false,
    };

    print_presets(&mut io::stdout())?;

    readline_loop(|raw_line| {
        handle_line(&raw_line, &style, &mut io::stdout(), |prompt, out| {
            llm.run(&Input::Prompt(prompt), &infer_parameters, |event| {
                if let Err(err) = print_event(event, &mut *out, hidden_layer_path) {
                    log::error!("Could not write output: {err}");
                }
            })
        })
    })?;

    if prompt_cache_loaded {
        if let Err(err) = llm.release_prompt_cache() {
            log::warn!("{err}");
        }
    }

    Ok(())
}

#[tracing::instrument(skip_all)]
fn load_model(args: &Args) -> eyre::Result<Llm> {
    println!("rkllm init start");
    let sp = spinoff::Spinner::new(spinoff::spinners::Dots2, "Loading model...", None);
    let now = std::time::Instant::now();

    let loaded = check_model_path(&args.model_path).and_then(|()| {
        Llm::load(&args.model_parameters()).wrap_err("Could not load model")
    });
    match loaded {
        Ok(llm) => {
            sp.success(&format!(
                "rkllm init success ({}ms)",
                now.elapsed().as_millis()
            ));
            Ok(llm)
        }
        Err(err) => {
            sp.fail("rkllm init failed");
            Err(err)
        }
    }
}

fn check_model_path(path: &Path) -> eyre::Result<()> {
    eyre::ensure!(path.is_file(), "Model file {path:?} does not exist");
    Ok(())
}

/// Turns a line read at the `user:` prompt into the prompt for the model.
///
/// Breaks on exactly [EXIT_COMMAND]. Otherwise yields the preset question to echo, if the line
/// picked one, and the styled prompt.
pub fn prepare_line(
    raw_line: &str,
    style: &PromptStyle,
) -> ControlFlow<(), (Option<&'static str>, String)> {
    let line = raw_line.replace("\\\n", "\n");
    if line == EXIT_COMMAND {
        return ControlFlow::Break(());
    }

    let preset = resolve_preset(&line);
    let message = preset.unwrap_or(line.as_str());
    ControlFlow::Continue((preset, style.apply(message)))
}

/// Handles one line of the REPL, writing the echo and the `robot:` marker to `out` before
/// handing the prompt to `run`. A failed run is logged and the REPL carries on.
pub fn handle_line<W: Write>(
    raw_line: &str,
    style: &PromptStyle,
    out: &mut W,
    run: impl FnOnce(String, &mut W) -> Result<(), RkllmError>,
) -> eyre::Result<ControlFlow<()>> {
    let ControlFlow::Continue((preset, prompt)) = prepare_line(raw_line, style) else {
        return Ok(ControlFlow::Break(()));
    };

    if let Some(preset) = preset {
        writeln!(out, "{preset}")?;
    }
    util::print_token(out, "robot: ")?;
    if let Err(err) = run(prompt, out) {
        log::error!("{err}");
    }

    Ok(ControlFlow::Continue(()))
}

/// Writes the user-visible output for a single runtime event.
pub fn print_event(event: RunEvent, out: &mut impl Write, hidden_layer_path: &Path) -> io::Result<()> {
    match event {
        RunEvent::Token(text) => {
            write!(out, "{text}")?;
            out.flush()?;
        }
        RunEvent::Finished => writeln!(out)?,
        RunEvent::Error => writeln!(out, "\\run error")?,
        RunEvent::LastHiddenLayer(layer) => {
            writeln!(out, "\ndata_size:{}", layer.byte_len())?;
            match layer.save(hidden_layer_path) {
                Ok(()) => log::info!(
                    "Saved {} of hidden states ({} tokens x {}) to {hidden_layer_path:?}",
                    bytesize::to_string(layer.byte_len() as u64, false),
                    layer.token_count(),
                    layer.embedding_size(),
                ),
                Err(err) => log::error!("Could not write {hidden_layer_path:?}: {err}"),
            }
        }
        RunEvent::Waiting => {}
        RunEvent::Unknown(state) => log::debug!("Ignoring unknown callback state {state}"),
    }
    Ok(())
}

pub fn print_presets(out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "\n********************** Enter question number or type your own question ********************\n"
    )?;
    for (i, question) in PRESET_QUESTIONS.iter().enumerate() {
        writeln!(out, "[{i}] {question}")?;
    }
    writeln!(
        out,
        "\n*************************************************************************\n"
    )
}

/// Maps a line consisting of exactly a preset's index to that preset.
pub fn resolve_preset(line: &str) -> Option<&'static str> {
    PRESET_QUESTIONS
        .iter()
        .enumerate()
        .find(|(i, _)| i.to_string() == line)
        .map(|(_, question)| *question)
}

fn readline_loop(
    mut body: impl FnMut(String) -> eyre::Result<ControlFlow<()>>,
) -> eyre::Result<()> {
    let mut rl = rustyline::Editor::<LineContinuationValidator, DefaultHistory>::new()?;
    rl.set_helper(Some(LineContinuationValidator));
    rl.bind_sequence(force_newline_event_seq(), Cmd::Newline);

    loop {
        println!();
        match rl.readline("user: ") {
            Ok(raw_line) => {
                rl.add_history_entry(raw_line.as_str())?;
                match body(raw_line) {
                    Ok(ControlFlow::Continue(())) => {}
                    Ok(ControlFlow::Break(())) => break,
                    Err(err) => {
                        log::error!("{err}");
                        break;
                    }
                }
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                break;
            }
            Err(err) => {
                log::error!("{err}");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(not(windows))]
fn force_newline_event_seq() -> KeyEvent {
    KeyEvent(KeyCode::Enter, Modifiers::ALT)
}

#[cfg(windows)]
fn force_newline_event_seq() -> KeyEvent {
    KeyEvent(KeyCode::Enter, Modifiers::SHIFT)
}

#[derive(Completer, Helper, Highlighter, Hinter, Debug, Clone, Copy)]
struct LineContinuationValidator;

impl Validator for LineContinuationValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        if ctx.input().ends_with('\\') {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(event: RunEvent, path: &Path) -> String {
        let mut out = Vec::new();
        print_event(event, &mut out, path).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn wrap() -> PromptStyle {
        PromptStyle::Wrap {
            prefix: "<user>".to_string(),
            postfix: "<bot>".to_string(),
        }
    }

    fn asked(prompt: &str) -> ControlFlow<(), (Option<&'static str>, String)> {
        ControlFlow::Continue((None, prompt.to_string()))
    }

    #[test]
    fn only_an_exact_exit_ends_the_chat() {
        let style = wrap();
        assert_eq!(prepare_line("exit", &style), ControlFlow::Break(()));
        assert_eq!(prepare_line(" exit", &style), asked("<user> exit<bot>"));
        assert_eq!(prepare_line("Exit", &style), asked("<user>Exit<bot>"));
        assert_eq!(prepare_line("exit\\\n", &style), asked("<user>exit\n<bot>"));
    }

    #[test]
    fn preset_index_is_echoed_and_styled() {
        assert_eq!(
            prepare_line("0", &wrap()),
            ControlFlow::Continue((
                Some("Write a poem about snow"),
                "<user>Write a poem about snow<bot>".to_string()
            ))
        );
        assert_eq!(
            prepare_line("0", &PromptStyle::Raw),
            ControlFlow::Continue((
                Some("Write a poem about snow"),
                "Write a poem about snow".to_string()
            ))
        );
    }

    #[test]
    fn continuation_lines_are_joined() {
        assert_eq!(
            prepare_line("first\\\nsecond\\\nthird", &PromptStyle::Raw),
            asked("first\nsecond\nthird")
        );
    }

    #[test]
    fn handled_line_is_run_after_the_robot_marker() {
        let mut out = Vec::new();
        let mut prompts = Vec::new();
        let flow = handle_line("1", &wrap(), &mut out, |prompt, out| {
            prompts.push(prompt);
            out.extend_from_slice(b"answer\n");
            Ok(())
        })
        .unwrap();

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("<user>Each boy plants 3 trees"));
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with("Each boy plants 3 trees"));
        assert!(printed.ends_with("\nrobot: answer\n"));
    }

    #[test]
    fn failed_runs_keep_the_chat_going() {
        let mut out = Vec::new();
        let flow = handle_line("hello", &wrap(), &mut out, |_, _| {
            Err(RkllmError::Run { status: -1 })
        })
        .unwrap();

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(out, b"robot: ");
    }

    #[test]
    fn exit_does_not_run_the_model() {
        let mut out = Vec::new();
        let flow = handle_line("exit", &wrap(), &mut out, |_, _| {
            panic!("the model should not run on exit")
        })
        .unwrap();

        assert_eq!(flow, ControlFlow::Break(()));
        assert!(out.is_empty());
    }

    #[test]
    fn missing_model_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("model.rkllm");
        let err = check_model_path(&missing).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(check_model_path(dir.path()).is_err());

        std::fs::write(&missing, b"").unwrap();
        check_model_path(&missing).unwrap();
    }

    #[test]
    fn presets_resolve_by_exact_index() {
        assert_eq!(resolve_preset("0"), Some("Write a poem about snow"));
        assert!(resolve_preset("1").unwrap().starts_with("Each boy plants 3 trees"));
        assert_eq!(resolve_preset("2"), None);
        assert_eq!(resolve_preset("00"), None);
        assert_eq!(resolve_preset(" 0"), None);
        assert_eq!(resolve_preset("Write a poem about rain"), None);
    }

    #[test]
    fn presets_banner_lists_every_question() {
        let mut out = Vec::new();
        print_presets(&mut out).unwrap();
        let banner = String::from_utf8(out).unwrap();

        assert!(banner.contains("Enter question number or type your own question"));
        assert!(banner.contains("[0] Write a poem about snow\n"));
        assert!(banner.contains("[1] Each boy plants 3 trees"));
    }

    #[test]
    fn text_events_are_printed() {
        let path = Path::new(DEFAULT_HIDDEN_LAYER_PATH);
        assert_eq!(render(RunEvent::Token("Snow".to_string()), path), "Snow");
        assert_eq!(render(RunEvent::Finished, path), "\n");
        assert_eq!(render(RunEvent::Error, path), "\\run error\n");
        assert_eq!(render(RunEvent::Waiting, path), "");
        assert_eq!(render(RunEvent::Unknown(9), path), "");
    }

    #[test]
    fn hidden_layer_events_are_dumped_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_HIDDEN_LAYER_PATH);
        let layer = rkllm::HiddenLayer::from_states(2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

        assert_eq!(render(RunEvent::LastHiddenLayer(layer), &path), "\ndata_size:24\n");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);
    }

    #[test]
    fn hidden_layer_write_failures_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("dump.bin");
        let layer = rkllm::HiddenLayer::from_states(1, vec![1.0]).unwrap();

        assert_eq!(render(RunEvent::LastHiddenLayer(layer), &path), "\ndata_size:4\n");
        assert!(!path.exists());
    }
}
