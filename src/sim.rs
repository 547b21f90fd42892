// Copyright 2026 Cornell University
// released under MIT License

//! # Verilog designs simulated with patronus
//! The design is converted to BTOR2 with yosys and executed by the patronus
//! interpreter. Every rising edge of the harness clock is one `step`.

use std::path::Path;

use baa::{BitVecOps, BitVecValue, WidthInt};
use log::info;
use patronus::expr::{Context, ExprRef};
use patronus::sim::{Interpreter, Simulator};
use patronus::system::TransitionSystem;
use thiserror::Error;

use crate::dut::Dut;
use crate::errors::{HarnessError, HarnessResult};
use crate::signals::{Bus, Signals};
use crate::yosys::{yosys_to_btor, ProjectConf, YosysEnv, YosysError};

#[derive(Error, Debug)]
pub enum DesignError {
    #[error(transparent)]
    Yosys(#[from] YosysError),
    #[error("failed to parse BTOR file - possibly malformed: {0}")]
    BtorParse(String),
    #[error("design has no {kind} port named `{name}`")]
    MissingPort { kind: &'static str, name: String },
}

/// Names of the design ports. Bus ports are called `<bus>_<suffix>`,
/// e.g. `write_en` or `read_rdy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortNames {
    pub reset: String,
    pub enable: String,
    pub address: String,
    pub data: String,
    pub ready: String,
}

impl Default for PortNames {
    fn default() -> Self {
        Self {
            reset: "RST_N".to_string(),
            enable: "en".to_string(),
            address: "address".to_string(),
            data: "data".to_string(),
            ready: "rdy".to_string(),
        }
    }
}

impl PortNames {
    fn bus_port(&self, bus: Bus, suffix: &str) -> String {
        format!("{}_{}", bus.prefix(), suffix)
    }
}

/// A transition system together with the context its expressions live in.
/// A `PatronusDut` borrows it for as long as the simulation runs.
pub struct Design {
    ctx: Context,
    sys: TransitionSystem,
}

impl Design {
    /// Synthesizes `verilog` with yosys and loads the resulting transition system
    pub fn from_verilog(verilog: &Path, top: Option<&str>) -> Result<Self, DesignError> {
        let env = YosysEnv::with_temp_dir()?;
        let project = ProjectConf::with_sources(vec![verilog.to_path_buf()], top.map(String::from));
        let btor_file = yosys_to_btor(&env, &project, None)?;
        let (ctx, sys) = patronus::btor2::parse_file(btor_file.as_os_str())
            .ok_or_else(|| DesignError::BtorParse(btor_file.to_string_lossy().to_string()))?;
        Ok(Self { ctx, sys })
    }

    pub fn from_btor_str(name: &str, btor: &str) -> Result<Self, DesignError> {
        let mut ctx = Context::default();
        let sys = patronus::btor2::parse_str(&mut ctx, btor, Some(name))
            .ok_or_else(|| DesignError::BtorParse(name.to_string()))?;
        Ok(Self { ctx, sys })
    }

    pub fn name(&self) -> &str {
        &self.sys.name
    }

    fn find_input(&self, name: &str) -> Result<ExprRef, DesignError> {
        self.sys
            .inputs
            .iter()
            .find(|i| self.ctx.get_symbol_name(**i) == Some(name))
            .copied()
            .ok_or_else(|| DesignError::MissingPort {
                kind: "input",
                name: name.to_string(),
            })
    }

    fn find_output(&self, name: &str) -> Result<ExprRef, DesignError> {
        self.sys
            .outputs
            .iter()
            .find(|o| &self.ctx[o.name] == name)
            .map(|o| o.expr)
            .ok_or_else(|| DesignError::MissingPort {
                kind: "output",
                name: name.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct InputPort {
    expr: ExprRef,
    width: WidthInt,
}

impl InputPort {
    fn value(&self, value: u64) -> BitVecValue {
        let masked = if self.width >= 64 {
            value
        } else {
            value & ((1u64 << self.width) - 1)
        };
        BitVecValue::from_u64(masked, self.width)
    }
}

/// The write bus drives `data`, the read bus samples it
#[derive(Debug, Clone, Copy)]
enum DataPort {
    Drive(InputPort),
    Sample(ExprRef),
}

#[derive(Debug, Clone, Copy)]
struct BusPorts {
    enable: InputPort,
    address: InputPort,
    data: DataPort,
    ready: ExprRef,
}

pub struct PatronusDut<'a> {
    sim: Interpreter<'a>,
    reset: InputPort,
    buses: [BusPorts; 2],
}

impl<'a> PatronusDut<'a> {
    pub fn new(design: &'a Design, names: &PortNames) -> Result<Self, DesignError> {
        let mut sim = Interpreter::new(&design.ctx, &design.sys);
        sim.init();

        for input in &design.sys.inputs {
            info!("Input: {:?}", design.ctx.get_symbol_name(*input));
        }
        for output in &design.sys.outputs {
            info!("Output: {}", &design.ctx[output.name]);
        }

        // inputs start out as zero after `init`, which tells us their width
        let input = |sim: &Interpreter<'a>, name: &str| -> Result<InputPort, DesignError> {
            let expr = design.find_input(name)?;
            let zero = sim.get(expr).ok_or_else(|| DesignError::MissingPort {
                kind: "bit-vector input",
                name: name.to_string(),
            })?;
            Ok(InputPort {
                expr,
                width: zero.width(),
            })
        };
        let bus_ports = |bus: Bus, sim: &Interpreter<'a>| -> Result<BusPorts, DesignError> {
            let data_name = names.bus_port(bus, &names.data);
            let data = match bus {
                Bus::Write => DataPort::Drive(input(sim, &data_name)?),
                Bus::Read => DataPort::Sample(design.find_output(&data_name)?),
            };
            Ok(BusPorts {
                enable: input(sim, &names.bus_port(bus, &names.enable))?,
                address: input(sim, &names.bus_port(bus, &names.address))?,
                data,
                ready: design.find_output(&names.bus_port(bus, &names.ready))?,
            })
        };

        let reset = input(&sim, &names.reset)?;
        let buses = [bus_ports(Bus::Write, &sim)?, bus_ports(Bus::Read, &sim)?];
        Ok(Self { sim, reset, buses })
    }

    fn drive(&mut self, signals: &Signals) {
        self.sim
            .set(self.reset.expr, &self.reset.value(signals.rst_n as u64));
        for bus in Bus::ALL {
            let ports = self.buses[bus.index()];
            let channel = signals.channel(bus);
            self.sim
                .set(ports.enable.expr, &ports.enable.value(channel.enable as u64));
            self.sim
                .set(ports.address.expr, &ports.address.value(channel.address));
            if let DataPort::Drive(port) = ports.data {
                self.sim.set(port.expr, &port.value(channel.data));
            }
        }
    }

    fn sample(&self, expr: ExprRef) -> HarnessResult<u64> {
        let value = self
            .sim
            .get(expr)
            .ok_or_else(|| HarnessError::Simulator(format!("{expr:?} is not a bit-vector")))?;
        value.to_u64().ok_or_else(|| {
            HarnessError::Simulator(format!(
                "{expr:?} holds a value wider than 64 bits ({} bits)",
                value.width()
            ))
        })
    }
}

impl Dut for PatronusDut<'_> {
    fn settle(&mut self, signals: &mut Signals) -> HarnessResult<()> {
        self.drive(signals);
        for bus in Bus::ALL {
            let ports = self.buses[bus.index()];
            let ready = self.sample(ports.ready)? != 0;
            signals.channel_mut(bus).ready = ready;
            if let DataPort::Sample(expr) = ports.data {
                signals.channel_mut(bus).data = self.sample(expr)?;
            }
        }
        Ok(())
    }

    fn rising_edge(&mut self, signals: &Signals) -> HarnessResult<()> {
        self.drive(signals);
        self.sim.step();
        Ok(())
    }
}
