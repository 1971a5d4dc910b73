use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::Encoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::Filter;

use crate::config::ServerConfig;
use crate::controller::{ControlError, Controller};
use crate::cpu::StepOutcome;
use crate::decode::mnemonic;
use crate::front_panel::{ControlSwitch, FrontPanel, Lamps, Position};
use crate::memory::MEMORY_SIZE;
use crate::metrics::{
    forget_machine, init_metrics, record_api_request, record_program_load, record_redraw,
    set_active_machines, update_cpu_registers, Timer, REGISTRY,
};
use crate::program::{decode_image, encode_image, read_program, ProgramError};
use crate::scheduler::{lock, start_driver, SharedController};
use crate::status::{memory_map, MachineStatus};

const DEFAULT_MAP_LENGTH: usize = 64;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("machine {0} not found")]
    NotFound(String),
    #[error("machine limit of {0} reached")]
    Capacity(usize),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("unknown switch or position {0:?}")]
    UnknownSwitch(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Control(_) => StatusCode::CONFLICT,
            ApiError::Program(_) | ApiError::UnknownSwitch(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to load boot program: {0}")]
    BootProgram(#[from] ProgramError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: warp::Error,
    },
}

#[derive(Debug, Serialize)]
pub struct MachineState {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub redraws: u64,
    pub status: MachineStatus,
    pub sys_info: String,
}

#[derive(Debug, Serialize)]
pub struct StepResult {
    pub halted: bool,
    pub machine: MachineState,
}

#[derive(Debug, Serialize)]
pub struct CursorState {
    pub address: u16,
    pub value: u8,
    pub mnemonic: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PanelState {
    pub lamps: Lamps,
    pub lit: Vec<&'static str>,
    pub address_switches: u16,
}

#[derive(Debug, Serialize)]
pub struct MemoryData {
    pub address: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct MemoryMap {
    pub address: u16,
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ProgramImage {
    pub length: usize,
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct ExamineRequest {
    pub address: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub value: u8,
    #[serde(default)]
    pub next: bool,
}

#[derive(Debug, Deserialize)]
pub struct MemoryQuery {
    #[serde(default)]
    pub address: u16,
    pub length: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PanelRequest {
    Switch { switch: String, position: String },
    AddressSwitches { address_switches: u16 },
}

#[derive(Debug, Deserialize)]
pub struct ProgramLoad {
    pub image: String,
    pub address: Option<u16>,
}

pub struct MachineEntry {
    controller: SharedController,
    panel: FrontPanel,
    created_at: DateTime<Utc>,
    redraws: Arc<AtomicU64>,
    driver: Option<JoinHandle<u64>>,
}

impl MachineEntry {
    fn state(&self, id: &str, controller: &Controller) -> MachineState {
        let status = MachineStatus::capture(controller);
        let sys_info = status.to_string();
        MachineState {
            id: id.to_string(),
            created_at: self.created_at,
            redraws: self.redraws.load(Ordering::SeqCst),
            status,
            sys_info,
        }
    }
}

// Starts a run loop unless one already owns the machine. `machine` is the
// locked `controller`; the ownership check happens under that lock.
fn ensure_driver(
    driver: &mut Option<JoinHandle<u64>>,
    machine: &mut Controller,
    controller: &SharedController,
    period: Duration,
) {
    if let Some(handle) = start_driver(machine, controller, period) {
        *driver = Some(handle);
    }
}

type MachineMap = Arc<Mutex<HashMap<String, MachineEntry>>>;

#[derive(Clone)]
pub struct AppState {
    machines: MachineMap,
    tick_interval: Duration,
    max_machines: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            machines: Arc::new(Mutex::new(HashMap::new())),
            tick_interval: config.tick_interval,
            max_machines: config.max_machines,
        }
    }

    fn machines(&self) -> MutexGuard<'_, HashMap<String, MachineEntry>> {
        self.machines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn machine_count(&self) -> usize {
        self.machines().len()
    }

    /// Creates a stopped machine, optionally preloaded with a program at address 0.
    pub fn create_machine(&self, image: Option<&[u8]>) -> Result<MachineState, ApiError> {
        let mut machines = self.machines();
        if machines.len() >= self.max_machines {
            return Err(ApiError::Capacity(self.max_machines));
        }

        let id = Uuid::new_v4().to_string();
        let redraws = Arc::new(AtomicU64::new(0));
        let mut controller = Controller::new();
        if let Some(image) = image {
            controller.load_program(image, 0)?;
            record_program_load(&id);
        }
        let counter = redraws.clone();
        let label = id.clone();
        controller.set_redraw_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            record_redraw(&label);
        });
        update_cpu_registers(&id, controller.cpu());

        let entry = MachineEntry {
            controller: Arc::new(Mutex::new(controller)),
            panel: FrontPanel::new(),
            created_at: Utc::now(),
            redraws,
            driver: None,
        };
        let state = entry.state(&id, &lock(&entry.controller));
        machines.insert(id.clone(), entry);
        set_active_machines(machines.len());
        info!(machine = %id, count = machines.len(), "machine created");
        Ok(state)
    }

    fn with_machine<T, F>(&self, id: &str, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut MachineEntry) -> Result<T, ApiError>,
    {
        let mut machines = self.machines();
        let entry = machines
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        f(entry)
    }
}

fn respond<T: Serialize>(
    method: &str,
    endpoint: &str,
    timer: Timer,
    result: Result<T, ApiError>,
) -> warp::reply::WithStatus<warp::reply::Json> {
    let (status, body) = match result {
        Ok(data) => (StatusCode::OK, warp::reply::json(&ApiResponse::success(data))),
        Err(err) => {
            warn!(method, endpoint, error = %err, "request rejected");
            let response: ApiResponse<()> = ApiResponse::error(err.to_string());
            (err.status(), warp::reply::json(&response))
        }
    };
    record_api_request(method, endpoint, status.as_u16(), timer.elapsed());
    warp::reply::with_status(body, status)
}

pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST", "DELETE"]);

    // Create new machine
    let create_machine = warp::path("machine")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(create_machine_handler);

    // List machines
    let list_machines = warp::path("machines")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_machines_handler);

    let get_machine = warp::path!("machine" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_machine_handler);

    let delete_machine = warp::path!("machine" / String)
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(delete_machine_handler);

    // Execution control
    let step = warp::path!("machine" / String / "step")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(step_handler);

    let run = warp::path!("machine" / String / "run")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(run_handler);

    let stop = warp::path!("machine" / String / "stop")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(stop_handler);

    let reset = warp::path!("machine" / String / "reset")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(reset_handler);

    let clear = warp::path!("machine" / String / "clear")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(clear_handler);

    // Memory cursor
    let examine = warp::path!("machine" / String / "examine")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(examine_handler);

    let deposit = warp::path!("machine" / String / "deposit")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(deposit_handler);

    // Memory inspection
    let read_memory = warp::path!("machine" / String / "memory")
        .and(warp::get())
        .and(warp::query::<MemoryQuery>())
        .and(with_state(state.clone()))
        .and_then(read_memory_handler);

    let memory_map = warp::path!("machine" / String / "memory" / "map")
        .and(warp::get())
        .and(warp::query::<MemoryQuery>())
        .and(with_state(state.clone()))
        .and_then(memory_map_handler);

    // Front panel
    let get_panel = warp::path!("machine" / String / "panel")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_panel_handler);

    let set_panel = warp::path!("machine" / String / "panel")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(set_panel_handler);

    // Program transfer
    let load_program = warp::path!("machine" / String / "program")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(load_program_handler);

    let save_program = warp::path!("machine" / String / "program")
        .and(warp::get())
        .and(with_state(state))
        .and_then(save_program_handler);

    // Metrics endpoint
    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(metrics_handler);

    create_machine
        .or(list_machines)
        .or(get_machine)
        .or(delete_machine)
        .or(step)
        .or(run)
        .or(stop)
        .or(reset)
        .or(clear)
        .or(examine)
        .or(deposit)
        .or(read_memory)
        .or(memory_map)
        .or(get_panel)
        .or(set_panel)
        .or(load_program)
        .or(save_program)
        .or(metrics)
        .with(cors)
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    init_metrics();
    let state = AppState::new(&config);

    if let Some(path) = &config.boot_program {
        let image = read_program(path)?;
        // the machine table is empty here, so only a load failure can occur
        match state.create_machine(Some(&image)) {
            Ok(machine) => info!(
                machine = %machine.id,
                bytes = image.len(),
                path = %path.display(),
                "boot program loaded"
            ),
            Err(err) => error!(error = %err, "failed to create boot machine"),
        }
    }

    let (addr, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(config.bind_addr, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .map_err(|source| ServerError::Bind {
            addr: config.bind_addr,
            source,
        })?;

    info!(
        bind = %addr,
        tick_micros = config.tick_interval.as_micros() as u64,
        max_machines = config.max_machines,
        "altair8800 server listening"
    );
    server.await;
    info!("server shut down");
    Ok(())
}

fn with_state(
    state: AppState,
) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn create_machine_handler(state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.create_machine(None);
    Ok(respond("POST", "/machine", timer, result))
}

async fn list_machines_handler(state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let machines = state.machines();
    let mut list: Vec<MachineState> = machines
        .iter()
        .map(|(id, entry)| entry.state(id, &lock(&entry.controller)))
        .collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(respond("GET", "/machines", timer, Ok(list)))
}

async fn get_machine_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let controller = lock(&entry.controller);
        Ok(entry.state(&id, &controller))
    });
    Ok(respond("GET", "/machine/:id", timer, result))
}

async fn delete_machine_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let mut machines = state.machines();
    let result = match machines.remove(&id) {
        Some(entry) => {
            if let Some(driver) = entry.driver {
                driver.abort();
            }
            forget_machine(&id);
            set_active_machines(machines.len());
            info!(machine = %id, count = machines.len(), "machine deleted");
            Ok(format!("Machine {} deleted", id))
        }
        None => Err(ApiError::NotFound(id)),
    };
    Ok(respond("DELETE", "/machine/:id", timer, result))
}

async fn step_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let mut controller = lock(&entry.controller);
        let outcome = controller.step()?;
        update_cpu_registers(&id, controller.cpu());
        Ok(StepResult {
            halted: outcome == StepOutcome::Halted,
            machine: entry.state(&id, &controller),
        })
    });
    Ok(respond("POST", "/machine/:id/step", timer, result))
}

async fn run_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let period = state.tick_interval;
    let result = state.with_machine(&id, |entry| {
        let mut controller = lock(&entry.controller);
        controller.run();
        ensure_driver(&mut entry.driver, &mut controller, &entry.controller, period);
        Ok(entry.state(&id, &controller))
    });
    Ok(respond("POST", "/machine/:id/run", timer, result))
}

async fn stop_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let mut controller = lock(&entry.controller);
        controller.stop();
        update_cpu_registers(&id, controller.cpu());
        Ok(entry.state(&id, &controller))
    });
    Ok(respond("POST", "/machine/:id/stop", timer, result))
}

async fn reset_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let mut controller = lock(&entry.controller);
        controller.reset()?;
        update_cpu_registers(&id, controller.cpu());
        Ok(entry.state(&id, &controller))
    });
    Ok(respond("POST", "/machine/:id/reset", timer, result))
}

async fn clear_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let mut controller = lock(&entry.controller);
        controller.clear()?;
        update_cpu_registers(&id, controller.cpu());
        Ok(entry.state(&id, &controller))
    });
    Ok(respond("POST", "/machine/:id/clear", timer, result))
}

fn cursor_state(controller: &Controller) -> CursorState {
    let value = controller.read_at_cursor();
    CursorState {
        address: controller.cursor(),
        value,
        mnemonic: mnemonic(value),
    }
}

async fn examine_handler(
    id: String,
    request: ExamineRequest,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let mut controller = lock(&entry.controller);
        if controller.is_running() {
            return Err(ControlError::Running("examine").into());
        }
        match request.address {
            Some(address) => controller.examine(address),
            None => controller.examine_next(),
        }
        Ok(cursor_state(&controller))
    });
    Ok(respond("POST", "/machine/:id/examine", timer, result))
}

async fn deposit_handler(
    id: String,
    request: DepositRequest,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let mut controller = lock(&entry.controller);
        if controller.is_running() {
            return Err(ControlError::Running("deposit").into());
        }
        if request.next {
            controller.examine_next();
        }
        controller.write_at_cursor(request.value);
        Ok(cursor_state(&controller))
    });
    Ok(respond("POST", "/machine/:id/deposit", timer, result))
}

async fn read_memory_handler(
    id: String,
    query: MemoryQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let controller = lock(&entry.controller);
        let length = query.length.unwrap_or(1).min(MEMORY_SIZE);
        Ok(MemoryData {
            address: query.address,
            data: controller.memory().read_range(query.address, length),
        })
    });
    Ok(respond("GET", "/machine/:id/memory", timer, result))
}

async fn memory_map_handler(
    id: String,
    query: MemoryQuery,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let controller = lock(&entry.controller);
        let length = query.length.unwrap_or(DEFAULT_MAP_LENGTH).min(MEMORY_SIZE);
        Ok(MemoryMap {
            address: query.address,
            lines: memory_map(controller.memory(), query.address, length),
        })
    });
    Ok(respond("GET", "/machine/:id/memory/map", timer, result))
}

fn panel_state(panel: &FrontPanel, controller: &Controller) -> PanelState {
    let lamps = Lamps::read(controller);
    PanelState {
        lamps,
        lit: lamps.lit(),
        address_switches: panel.address_switches(),
    }
}

async fn get_panel_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let controller = lock(&entry.controller);
        Ok(panel_state(&entry.panel, &controller))
    });
    Ok(respond("GET", "/machine/:id/panel", timer, result))
}

async fn set_panel_handler(
    id: String,
    request: PanelRequest,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let period = state.tick_interval;
    let result = state.with_machine(&id, |entry| match request {
        PanelRequest::AddressSwitches { address_switches } => {
            entry.panel.set_address_switches(address_switches);
            let controller = lock(&entry.controller);
            Ok(panel_state(&entry.panel, &controller))
        }
        PanelRequest::Switch { switch, position } => {
            let switch: ControlSwitch = switch.parse().map_err(ApiError::UnknownSwitch)?;
            let position: Position = position.parse().map_err(ApiError::UnknownSwitch)?;
            let mut controller = lock(&entry.controller);
            entry.panel.actuate(&mut controller, switch, position)?;
            if controller.is_running() {
                ensure_driver(&mut entry.driver, &mut controller, &entry.controller, period);
            }
            update_cpu_registers(&id, controller.cpu());
            Ok(panel_state(&entry.panel, &controller))
        }
    });
    Ok(respond("POST", "/machine/:id/panel", timer, result))
}

async fn load_program_handler(
    id: String,
    request: ProgramLoad,
    state: AppState,
) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let image = decode_image(&request.image)?;
        let address = request.address.unwrap_or(0);
        let mut controller = lock(&entry.controller);
        let written = controller.load_program(&image, address)?;
        record_program_load(&id);
        info!(machine = %id, bytes = written, address, "program loaded");
        Ok(format!("Loaded {} bytes at address {:04X}", written, address))
    });
    Ok(respond("POST", "/machine/:id/program", timer, result))
}

async fn save_program_handler(id: String, state: AppState) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let result = state.with_machine(&id, |entry| {
        let image = lock(&entry.controller).program_image();
        info!(machine = %id, bytes = image.len(), "program saved");
        Ok(ProgramImage {
            length: image.len(),
            image: encode_image(&image),
        })
    });
    Ok(respond("GET", "/machine/:id/program", timer, result))
}

async fn metrics_handler() -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => {
            record_api_request("GET", "/metrics", 200, timer.elapsed());
            Ok(warp::reply::with_header(
                metrics_text,
                "content-type",
                encoder.format_type().to_string(),
            ))
        }
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            record_api_request("GET", "/metrics", 500, timer.elapsed());
            Ok(warp::reply::with_header(
                "Error encoding metrics".to_string(),
                "content-type",
                "text/plain".to_string(),
            ))
        }
    }
}
