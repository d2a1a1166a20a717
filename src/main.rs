// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL2). Also, it is
// "Incompatible With Secondary Licenses", as defined by the MPL2.
// If a copy of the MPL2 was not distributed with this file, you can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{fs, path::PathBuf, process};

use clap::Parser;
use nds::Nds;

/// Headless dual-core console runner.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Cartridge image to load.
    rom: PathBuf,

    /// Number of frames to run before exiting.
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Log every executed instruction on both cores.
    #[arg(long)]
    trace: bool,
}

fn main() {
    let cli = Cli::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if cli.trace {
        logger.filter_level(log::LevelFilter::Trace);
    }
    logger.init();

    if let Err(e) = run(&cli) {
        log::error!("{e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let rom = fs::read(&cli.rom)?;

    let mut console = Nds::new()?;
    console.cpu9.borrow_mut().trace = cli.trace;
    console.cpu7.borrow_mut().trace = cli.trace;
    console.insert_rom(rom)?;

    for _ in 0..cli.frames {
        console.run_frame();
    }

    for (name, cpu) in [("arm9", &console.cpu9), ("arm7", &console.cpu7)] {
        for (insn, count) in cpu.borrow().coverage() {
            log::warn!("{name}: {count} unsupported '{insn}' executions");
        }
    }
    Ok(())
}
