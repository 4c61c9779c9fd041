use std::{
    ffi::OsString,
    io::{self, BufRead, BufReader, Read},
    process::{Child, ChildStdout, Command, Output, Stdio},
    thread::{self, JoinHandle},
};

use bitflags::bitflags;
use tracing::{debug, enabled, trace, Level};

use crate::result::{Error, Result};

/// Bytes fed to the standard input of a spawned program
pub type Input = Box<dyn Read + Send>;

/// Decides whether a diagnostic line printed on stderr is fatal
pub type LineClassifier = fn(&str) -> bool;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capture: u8 {
        const STDIN = 0b0000001;
        const STDOUT = 0b0000010;
        const STDERR = 0b0000100;
    }
}

/// Run a command to completion, returning its raw output handle.
///
/// IO handles will be captured only if the caller required it or if the log level is Debug.
/// In that last case, `stdout` and `stderr` will be logged.
///
/// The function returns an error only if the command failed to execute.
/// If the program runs but returns a non-0 status code, it will not trigger an error.
pub fn run_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
    capture: Capture,
) -> Result<Output> {
    let is_debug = enabled!(Level::DEBUG);
    let get_io = |capture| {
        if capture {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(get_io(capture.contains(Capture::STDIN)))
        .stdout(get_io(is_debug || capture.contains(Capture::STDOUT)))
        .stderr(get_io(is_debug || capture.contains(Capture::STDERR)));

    debug!("Executing command: {cmd:?}");
    let res = cmd.output().map_err(|source| Error::Spawn {
        program: program.to_string(),
        source,
    })?;

    if is_debug {
        debug!("status: {}", res.status);
        debug!("stdout: {} bytes long", res.stdout.len());
        trace!("stdout: {:?}", String::from_utf8_lossy(&res.stdout));
        debug!("stderr: {} bytes long", res.stderr.len());
        trace!("stderr: {:?}", String::from_utf8_lossy(&res.stderr));
    }

    Ok(res)
}

/// Run the command and verify that it has returned a success status code.
pub fn assert_success_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
) -> Result<()> {
    let res = run_command(program, f, Capture::empty())?;
    if res.status.success() {
        Ok(())
    } else {
        Err(Error::ExitCode {
            program: program.to_string(),
            code: res.status.code().unwrap_or(-1),
        })
    }
}

/// Flags every line mentioning an error, whatever its case
pub fn contains_error(line: &str) -> bool {
    line.to_lowercase().contains("error")
}

/// Spawn `program` with its standard streams piped.
///
/// `input`, when given, is copied into the program stdin by a dedicated thread,
/// which closes stdin once the reader is exhausted. Another thread reads stderr
/// line by line and keeps the first line flagged by `classifier`.
///
/// The returned [`ProcessStream`] yields the program stdout. Once it is
/// exhausted, the program outcome is checked: a flagged line, a failed stdin
/// copy, then a non-zero exit code, in that order, turn into an error.
pub fn spawn_stream(
    program: &str,
    args: &[OsString],
    input: Option<Input>,
    classifier: Option<LineClassifier>,
) -> Result<ProcessStream> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("Spawning command: {cmd:?}");
    let mut child = cmd.spawn().map_err(|source| Error::Spawn {
        program: program.to_string(),
        source,
    })?;

    let mut stream = ProcessStream {
        program: program.to_string(),
        stdout: child.stdout.take(),
        feeder: None,
        diagnostics: None,
        finished: false,
        child,
    };

    if let (Some(mut input), Some(mut stdin)) = (input, stream.child.stdin.take()) {
        stream.feeder = Some(
            thread::Builder::new()
                .name("feed-stdin".to_string())
                .spawn(move || {
                    let copied = io::copy(&mut input, &mut stdin);
                    drop(stdin);
                    copied
                })?,
        );
    }

    if let Some(stderr) = stream.child.stderr.take() {
        let program = stream.program.clone();
        stream.diagnostics = Some(
            thread::Builder::new()
                .name("read-stderr".to_string())
                .spawn(move || {
                    let mut flagged = None;
                    let mut reader = BufReader::new(stderr);
                    let mut buf = Vec::new();
                    // Keep draining until EOF so that the program never blocks on stderr
                    while let Ok(n) = reader.read_until(b'\n', &mut buf) {
                        if n == 0 {
                            break;
                        }
                        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                        buf.clear();

                        trace!("{program}: {line}");
                        if flagged.is_none() && classifier.is_some_and(|flags| flags(&line)) {
                            flagged = Some(line);
                        }
                    }
                    flagged
                })?,
        );
    }

    Ok(stream)
}

/// Standard output of a running program.
///
/// Dropping it before the end of the output kills the program.
#[derive(Debug)]
pub struct ProcessStream {
    program: String,
    child: Child,
    stdout: Option<ChildStdout>,
    feeder: Option<JoinHandle<io::Result<u64>>>,
    diagnostics: Option<JoinHandle<Option<String>>>,
    finished: bool,
}

impl ProcessStream {
    /// Discard the remaining output and check how the program ended
    pub fn finish(mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        if let Some(mut stdout) = self.stdout.take() {
            io::copy(&mut stdout, &mut io::sink())?;
        }
        self.wait_exit()
    }

    fn wait_exit(&mut self) -> Result<()> {
        self.finished = true;
        self.stdout = None;

        let flagged = match self.diagnostics.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Invariant("stderr reader panicked".to_string()))?,
            None => None,
        };

        let fed = match self.feeder.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Invariant("stdin feeder panicked".to_string()))?
                .map(Some),
            None => Ok(None),
        };

        let status = self.child.wait()?;
        debug!("{} exited with {status}", self.program);

        if let Some(line) = flagged {
            return Err(Error::Diagnostic {
                program: self.program.clone(),
                line,
            });
        }

        match fed {
            Ok(Some(bytes)) => debug!("Fed {bytes} bytes to {}", self.program),
            // The program may stop reading once it has what it needs
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                debug!("{} closed its input early", self.program)
            }
            Err(err) => return Err(err.into()),
            Ok(None) => (),
        }

        if status.success() {
            Ok(())
        } else {
            Err(Error::ExitCode {
                program: self.program.clone(),
                code: status.code().unwrap_or(-1),
            })
        }
    }
}

impl Read for ProcessStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(0);
        };

        let n = stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.wait_exit().map_err(io::Error::other)?;
        }
        Ok(n)
    }
}

impl Drop for ProcessStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Killing unfinished {}", self.program);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[test]
    fn pipes_input_through_the_program() {
        let input: Input = Box::new(Cursor::new(b"some media bytes".to_vec()));
        let mut stream = spawn_stream("sh", &sh("cat"), Some(input), Some(contains_error)).unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "some media bytes");
        stream.finish().unwrap();
    }

    #[test]
    fn error_line_on_stderr_is_fatal() {
        let script = "echo 'frame=1 ok' >&2; echo 'Some ERROR happened' >&2; echo out";
        let mut stream = spawn_stream("sh", &sh(script), None, Some(contains_error)).unwrap();

        let err = Error::from(stream.read_to_end(&mut Vec::new()).unwrap_err());
        match err {
            Error::Diagnostic { program, line } => {
                assert_eq!(program, "sh");
                assert_eq!(line, "Some ERROR happened");
            }
            err => panic!("unexpected error {err:?}"),
        }
    }

    #[test]
    fn non_zero_exit_is_reported_with_its_code() {
        let stream = spawn_stream("sh", &sh("echo fine >&2; exit 3"), None, None).unwrap();
        assert!(matches!(
            stream.finish(),
            Err(Error::ExitCode { code: 3, .. })
        ));
    }

    #[test]
    fn early_closed_input_is_not_an_error() {
        let input: Input = Box::new(Cursor::new(vec![0u8; 4 << 20]));
        let stream = spawn_stream("sh", &sh("head -c 10 >/dev/null"), Some(input), None).unwrap();
        stream.finish().unwrap();
    }

    #[test]
    fn missing_program_cannot_spawn() {
        let err = spawn_stream("clipcast-no-such-program", &[], None, None).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));

        let err = run_command("clipcast-no-such-program", |cmd| cmd, Capture::empty()).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn assert_success_reports_exit_code() {
        assert!(assert_success_command("sh", |cmd| cmd.args(["-c", "exit 0"])).is_ok());
        assert!(matches!(
            assert_success_command("sh", |cmd| cmd.args(["-c", "exit 2"])),
            Err(Error::ExitCode { code: 2, .. })
        ));
    }
}
