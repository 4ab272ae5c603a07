//! The mica command. Stages run in pipeline order: compile a source,
//! emit the binary, load a binary, then hand it to the emulator or the
//! kernel. A typical session:
//!
//! ```text
//! mica -c count.sl -o count.mx -m 64
//! mica -c os.sl -o os.mx -k 64 worker1.mx worker2.mx
//! ```
//!
//! run with `--help` for more info.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mica_asm::Image;
use mica_vm::{Kernel, MachineConfig, VmError};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// compile a Slate source file
    #[arg(short = 'c', value_name = "SOURCE")]
    compile: Option<PathBuf>,

    /// write the binary image to a file
    #[arg(short = 'o', value_name = "BINARY")]
    output: Option<PathBuf>,

    /// load a binary image from a file
    #[arg(short = 'l', value_name = "BINARY")]
    load: Option<PathBuf>,

    /// run the loaded binary with this much memory, in MiB
    #[arg(short = 'm', value_name = "MB", conflicts_with = "kernel")]
    emulate: Option<u32>,

    /// boot the loaded binary as the kernel process with this much
    /// memory, in MiB; trailing arguments are spawned as user processes
    #[arg(short = 'k', value_name = "MB")]
    kernel: Option<u32>,

    /// arguments for the emulated program, or executables to spawn
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mica: {err:#}");
            let code = err
                .downcast_ref::<VmError>()
                .map(VmError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut image: Option<Image> = None;
    let mut binary_name = String::new();

    if let Some(source) = &args.compile {
        let text = std::fs::read_to_string(source)
            .with_context(|| format!("could not open input file {}", source.display()))?;
        let name = source.display().to_string();

        image = Some(
            mica_cc::compile(&name, &text).map_err(|e| anyhow::anyhow!("{name}: {e}"))?,
        );
        binary_name = name;
    }

    if let Some(out) = &args.output {
        match &image {
            Some(image) => image
                .save(out)
                .with_context(|| format!("could not create output file {}", out.display()))?,
            None => bail!("nothing to emit to output file {}", out.display()),
        }
    }

    if let Some(input) = &args.load {
        image = Some(
            Image::load(input)
                .with_context(|| format!("could not open input file {}", input.display()))?,
        );
        binary_name = input.display().to_string();
    }

    let (memory_mb, is_kernel) = match (args.emulate, args.kernel) {
        (Some(mb), None) => (mb, false),
        (None, Some(mb)) => (mb, true),
        (None, None) => return Ok(()),
        (Some(_), Some(_)) => unreachable!("clap rejects -m with -k"),
    };

    let image = match image {
        Some(image) => image,
        None => bail!("nothing to run; compile or load a binary first"),
    };

    let config = MachineConfig {
        memory_mb,
        ..MachineConfig::default()
    };

    // the emulated program sees the binary name as its argv[0]
    let mut emulated_args = vec![binary_name];
    emulated_args.extend(args.args.iter().cloned());

    let mut kernel = Kernel::boot(&image, config, &emulated_args)?;

    if is_kernel {
        for path in &args.args {
            kernel.spawn(path)?;
        }
        tracing::debug!(pids = ?kernel.machine().pids(), "processes loaded");
    }

    let code = kernel.run()?;
    tracing::info!(code, "machine halted");
    Ok(())
}
