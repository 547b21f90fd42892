// Copyright 2026 Cornell University
// released under MIT License

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum YosysError {
    #[error("failed to find yosys, make sure it is on your path!")]
    YosysNotFound,
    #[error("failed to execute command: `{0}`\n{1}\n{2}")]
    FailedToExecuteCommand(String, String, String),
    #[error("no output generated: {0}")]
    OutputMissing(String),
    #[error("failed to perform i/o: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, YosysError>;

/// Directory yosys is run in. A temporary directory is removed when the
/// environment is dropped.
pub struct YosysEnv {
    working_dir: PathBuf,
    _temp: Option<tempfile::TempDir>,
}

impl YosysEnv {
    pub fn with_temp_dir() -> Result<Self> {
        let dir = tempfile::TempDir::new()?;
        Ok(Self {
            working_dir: dir.path().to_path_buf(),
            _temp: Some(dir),
        })
    }

    pub fn in_dir(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            _temp: None,
        }
    }

    pub fn working_dir(&self) -> &Path {
        self.working_dir.as_path()
    }
}

#[derive(Default, Debug)]
pub struct ProjectConf {
    sources: Vec<PathBuf>,
    top: Option<String>,
}

impl ProjectConf {
    pub fn with_sources(sources: Vec<PathBuf>, top: Option<String>) -> Self {
        Self { sources, top }
    }
}

pub fn run_yosys<C>(env: &YosysEnv, commands: &[C]) -> Result<String>
where
    C: AsRef<str>,
{
    let cmd_str = commands
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(" ; ");
    debug!("yosys -p \"{}\"", cmd_str);

    let mut cmd = std::process::Command::new("yosys");
    cmd.arg("-p").arg(&cmd_str).current_dir(&env.working_dir);

    let res = cmd.output().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => YosysError::YosysNotFound,
        _ => YosysError::IoError(e),
    })?;
    let out = String::from_utf8_lossy(&res.stdout).to_string();
    if res.status.success() {
        Ok(out)
    } else {
        let err = String::from_utf8_lossy(&res.stderr).to_string();
        Err(YosysError::FailedToExecuteCommand(
            format!("{cmd:?}"),
            out,
            err,
        ))
    }
}

const MINIMAL_BTOR_CONVERSION: &[&str] = &[
    "proc -noopt",
    "async2sync", // required for designs with async reset
    "flatten",
    "dffunmap",
];

fn read_sources(project: &ProjectConf) -> Result<Vec<String>> {
    let mut out = vec![];
    for source in &project.sources {
        // canonicalize file paths since yosys runs in a different directory
        let source = fs::canonicalize(source)?;
        out.push(format!("read_verilog -sv {}", source.to_string_lossy()));
    }
    if let Some(top) = &project.top {
        out.push(format!("hierarchy -top {}", top));
    }
    Ok(out)
}

/// Converts the project into a BTOR2 file inside the working directory
pub fn yosys_to_btor(
    env: &YosysEnv,
    project: &ProjectConf,
    btor_name: Option<&Path>,
) -> Result<PathBuf> {
    // auto-generate a btor_name if it was not given
    let btor_name = match (btor_name, &project.top, project.sources.first()) {
        (Some(name), _, _) => name.to_path_buf(),
        (None, Some(top), _) => PathBuf::from(format!("{top}.btor")),
        (None, None, Some(source)) => PathBuf::from(source.file_name().unwrap_or_default())
            .with_extension("btor"),
        (None, None, None) => PathBuf::from("design.btor"),
    };

    let mut cmd = read_sources(project)?;
    cmd.extend(MINIMAL_BTOR_CONVERSION.iter().map(|s| s.to_string()));
    cmd.push(format!("write_btor -x {}", btor_name.to_string_lossy()));
    run_yosys(env, &cmd)?;

    let btor_full = if btor_name.is_absolute() {
        btor_name
    } else {
        env.working_dir.join(btor_name)
    };
    match fs::metadata(&btor_full) {
        Ok(meta) if meta.len() > 0 => Ok(btor_full),
        _ => Err(YosysError::OutputMissing(
            btor_full.to_string_lossy().to_string(),
        )),
    }
}

/// Fails if yosys cannot be found on the path
pub fn require_yosys() -> Result<()> {
    for flag in ["-version", "--version"] {
        if let Ok(res) = std::process::Command::new("yosys").arg(flag).output() {
            if String::from_utf8_lossy(&res.stdout).starts_with("Yosys") {
                return Ok(());
            }
        }
    }
    Err(YosysError::YosysNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OR_DUT: &str = "tests/designs/or_dut.v";

    #[test]
    fn test_run_yosys_fail() {
        if require_yosys().is_err() {
            return;
        }
        // run_yosys should signal a failure when yosys fails
        let cmds = ["read_verilog inputs/does_not_exist.v"];
        let env = YosysEnv::with_temp_dir().unwrap();
        assert!(matches!(
            run_yosys(&env, &cmds),
            Err(YosysError::FailedToExecuteCommand(..))
        ));
    }

    #[test]
    fn test_yosys_to_btor_auto_name() {
        if require_yosys().is_err() {
            return;
        }
        let env = YosysEnv::with_temp_dir().unwrap();
        let proj = ProjectConf::with_sources(vec![PathBuf::from(OR_DUT)], None);
        let btor_file = yosys_to_btor(&env, &proj, None).unwrap();
        // derived from sources
        assert!(btor_file.ends_with("or_dut.btor"));
        assert!(btor_file.starts_with(env.working_dir()));
    }

    #[test]
    fn test_missing_source() {
        let env = YosysEnv::in_dir(".");
        let proj = ProjectConf::with_sources(vec![PathBuf::from("does/not/exist.v")], None);
        assert!(matches!(
            yosys_to_btor(&env, &proj, None),
            Err(YosysError::IoError(_))
        ));
    }
}
