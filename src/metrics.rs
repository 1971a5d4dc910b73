use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};
use std::sync::Once;
use std::time::{Duration, Instant};

use crate::cpu::{Cpu, Reg, AUX_CARRY_FLAG, CARRY_FLAG, PARITY_FLAG, SIGN_FLAG, ZERO_FLAG};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// `opcode` label values, indexed by opcode byte
    static ref OPCODE_LABELS: Vec<String> =
        (0..=u8::MAX).map(|opcode| format!("0x{:02X}", opcode)).collect();

    /// Counter for total CPU instructions executed by opcode
    pub static ref CPU_INSTRUCTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cpu_instructions_total", "Total number of CPU instructions executed by opcode"),
        &["opcode", "instruction"]
    ).expect("Failed to create CPU instructions counter");

    /// Counter for CPU cycles executed
    pub static ref CPU_CYCLES_TOTAL: Counter = Counter::new(
        "cpu_cycles_total", "Total number of fetch-decode-execute cycles"
    ).expect("Failed to create CPU cycles counter");

    /// Histogram for instruction execution time
    pub static ref INSTRUCTION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("instruction_duration_seconds", "Time spent executing instructions")
            .buckets(vec![0.000001, 0.000005, 0.00001, 0.00005, 0.0001, 0.0005, 0.001]),
        &["instruction"]
    ).expect("Failed to create instruction duration histogram");

    /// Counter for execution controller transitions
    pub static ref CONTROLLER_TRANSITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("controller_transitions_total", "Execution controller transitions by kind"),
        &["transition"]
    ).expect("Failed to create controller transitions counter");

    /// Counter for redraw notifications delivered per machine
    pub static ref PANEL_REDRAWS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("panel_redraws_total", "Redraw notifications raised by the execution controller"),
        &["machine_id"]
    ).expect("Failed to create panel redraws counter");

    /// Counter for API requests by endpoint and method
    pub static ref API_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("api_requests_total", "Total number of API requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create API requests counter");

    /// Histogram for API request duration
    pub static ref API_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("api_request_duration_seconds", "API request duration")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method", "endpoint"]
    ).expect("Failed to create API request duration histogram");

    /// Gauge for existing machines
    pub static ref ACTIVE_MACHINES: Gauge = Gauge::new(
        "active_machines_total", "Number of machines currently held by the server"
    ).expect("Failed to create active machines gauge");

    /// Gauge for CPU register values by machine ID
    pub static ref CPU_REGISTER_VALUES: GaugeVec = GaugeVec::new(
        Opts::new("cpu_register_value", "Current CPU register values"),
        &["machine_id", "register"]
    ).expect("Failed to create CPU register values gauge");

    /// Gauge for CPU flags by machine ID
    pub static ref CPU_FLAGS: GaugeVec = GaugeVec::new(
        Opts::new("cpu_flags", "Current CPU flag states (0 or 1)"),
        &["machine_id", "flag"]
    ).expect("Failed to create CPU flags gauge");

    /// Counter for program loads
    pub static ref PROGRAM_LOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("program_loads_total", "Total number of programs loaded"),
        &["machine_id"]
    ).expect("Failed to create program loads counter");
}

static INIT: Once = Once::new();

/// Registers every metric with the global registry. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(CPU_INSTRUCTIONS_TOTAL.clone()))
            .expect("Failed to register CPU instructions counter");

        REGISTRY
            .register(Box::new(CPU_CYCLES_TOTAL.clone()))
            .expect("Failed to register CPU cycles counter");

        REGISTRY
            .register(Box::new(INSTRUCTION_DURATION.clone()))
            .expect("Failed to register instruction duration histogram");

        REGISTRY
            .register(Box::new(CONTROLLER_TRANSITIONS_TOTAL.clone()))
            .expect("Failed to register controller transitions counter");

        REGISTRY
            .register(Box::new(PANEL_REDRAWS_TOTAL.clone()))
            .expect("Failed to register panel redraws counter");

        REGISTRY
            .register(Box::new(API_REQUESTS_TOTAL.clone()))
            .expect("Failed to register API requests counter");

        REGISTRY
            .register(Box::new(API_REQUEST_DURATION.clone()))
            .expect("Failed to register API request duration histogram");

        REGISTRY
            .register(Box::new(ACTIVE_MACHINES.clone()))
            .expect("Failed to register active machines gauge");

        REGISTRY
            .register(Box::new(CPU_REGISTER_VALUES.clone()))
            .expect("Failed to register CPU register values gauge");

        REGISTRY
            .register(Box::new(CPU_FLAGS.clone()))
            .expect("Failed to register CPU flags gauge");

        REGISTRY
            .register(Box::new(PROGRAM_LOADS_TOTAL.clone()))
            .expect("Failed to register program loads counter");
    });
}

/// Record a CPU instruction execution
pub fn record_instruction(opcode: u8, instruction_name: &str, duration: Duration) {
    CPU_INSTRUCTIONS_TOTAL
        .with_label_values(&[&OPCODE_LABELS[opcode as usize], instruction_name])
        .inc();

    CPU_CYCLES_TOTAL.inc();

    INSTRUCTION_DURATION
        .with_label_values(&[instruction_name])
        .observe(duration.as_secs_f64());
}

/// Record an execution controller transition
pub fn record_transition(transition: &str) {
    CONTROLLER_TRANSITIONS_TOTAL
        .with_label_values(&[transition])
        .inc();
}

/// Record a redraw notification
pub fn record_redraw(machine_id: &str) {
    PANEL_REDRAWS_TOTAL
        .with_label_values(&[machine_id])
        .inc();
}

/// Record an API request
pub fn record_api_request(method: &str, endpoint: &str, status: u16, duration: Duration) {
    API_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    API_REQUEST_DURATION
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

/// Update machine count
pub fn set_active_machines(count: usize) {
    ACTIVE_MACHINES.set(count as f64);
}

/// Update CPU register and flag metrics for a machine
pub fn update_cpu_registers(machine_id: &str, cpu: &Cpu) {
    let registers = [
        ("A", cpu.reg(Reg::A) as f64),
        ("B", cpu.reg(Reg::B) as f64),
        ("C", cpu.reg(Reg::C) as f64),
        ("D", cpu.reg(Reg::D) as f64),
        ("E", cpu.reg(Reg::E) as f64),
        ("H", cpu.reg(Reg::H) as f64),
        ("L", cpu.reg(Reg::L) as f64),
        ("PC", cpu.get_pc() as f64),
        ("SP", cpu.get_sp() as f64),
    ];
    for (name, value) in registers {
        CPU_REGISTER_VALUES
            .with_label_values(&[machine_id, name])
            .set(value);
    }

    update_cpu_flags(machine_id, cpu.get_status());
}

/// Update CPU flag metrics for a machine
pub fn update_cpu_flags(machine_id: &str, status: u8) {
    let flags = [
        ("carry", CARRY_FLAG),
        ("parity", PARITY_FLAG),
        ("auxiliary_carry", AUX_CARRY_FLAG),
        ("zero", ZERO_FLAG),
        ("sign", SIGN_FLAG),
    ];
    for (name, mask) in flags {
        CPU_FLAGS
            .with_label_values(&[machine_id, name])
            .set(if status & mask != 0 { 1.0 } else { 0.0 });
    }
}

/// Remove per-machine series once a machine is gone
pub fn forget_machine(machine_id: &str) {
    for register in ["A", "B", "C", "D", "E", "H", "L", "PC", "SP"] {
        let _ = CPU_REGISTER_VALUES.remove_label_values(&[machine_id, register]);
    }
    for flag in ["carry", "parity", "auxiliary_carry", "zero", "sign"] {
        let _ = CPU_FLAGS.remove_label_values(&[machine_id, flag]);
    }
    let _ = PANEL_REDRAWS_TOTAL.remove_label_values(&[machine_id]);
    let _ = PROGRAM_LOADS_TOTAL.remove_label_values(&[machine_id]);
}

/// Record a program load
pub fn record_program_load(machine_id: &str) {
    PROGRAM_LOADS_TOTAL
        .with_label_values(&[machine_id])
        .inc();
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
