use blackprobe::logging::init_logging;
use blackprobe::probe::ResponseRecorder;
use blackprobe::runtime::probe_http;
use blackprobe::settings::load_from_cli;
use std::io::Write;
use std::process::ExitCode;

fn main() -> ExitCode {
    let settings = match load_from_cli() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("blackprobe: {err}");
            return ExitCode::from(2);
        }
    };
    init_logging(settings.log_level.as_deref());
    tracing::debug!(module = %settings.module_name, "Loaded module");

    let mut recorder = ResponseRecorder::new();
    let success = probe_http(&settings.target, &mut recorder, &settings.module);

    let mut stdout = std::io::stdout().lock();
    if stdout.write_all(recorder.body.as_bytes()).is_err() {
        return ExitCode::from(2);
    }
    let _ = stdout.flush();

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
