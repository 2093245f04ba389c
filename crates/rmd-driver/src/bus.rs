//! 总线会话
//!
//! `RmdBus` 持有一条物理总线上的全部共享状态：注册表、关联器、遥测缓存、路由器。
//! 会话是显式构造、显式销毁的对象，同一进程中可以并存多条总线（例如测试中的模拟总线）。
//!
//! # 调度模型
//!
//! - **多线程**（`RmdBus::new`）：一个 RX 线程接收帧、经路由器分发、周期性检查超时；
//!   调用方线程阻塞在各自请求的通道上。
//! - **协作式**（`RmdBus::manual`）：不创建线程，持有者自行调用
//!   `on_frame_received` 与 `poll_timeouts`，请求结果通过 `PendingRequest::try_result` 轮询。
//!
//! # 接收路径
//!
//! ```text
//! RxAdapter::receive
//!   → on_frame_received（补时间戳）
//!   → CanRouter::dispatch（按仲裁 ID）
//!   → 设备监听者: 解码 → 更新遥测缓存 → 完成在途请求（唤醒调用方）
//! ```

use crate::config::BusConfig;
use crate::correlator::{Correlator, SlotKey};
use crate::error::DriverError;
use crate::metrics::{BusMetrics, MetricsSnapshot};
use crate::registry::{DeviceEntry, DeviceRegistry, LogicalId};
use crate::session::Actuator;
use crate::telemetry::{TelemetryCache, TelemetrySnapshot, UpdateOutcome};
use parking_lot::Mutex;
use rmd_can::{
    CanAdapter, CanError, CanRouter, FrameListener, RmdFrame, RouteId, RxAdapter,
    SplittableAdapter, TxAdapter,
};
use rmd_protocol::Reply;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// 总线共享状态（命令路径与接收路径共用）
pub(crate) struct BusCore {
    pub(crate) config: BusConfig,
    pub(crate) registry: DeviceRegistry,
    pub(crate) correlator: Arc<Correlator>,
    pub(crate) telemetry: TelemetryCache,
    pub(crate) router: CanRouter,
    pub(crate) metrics: Arc<BusMetrics>,
    tx: Mutex<Box<dyn TxAdapter + Send>>,
    epoch: Instant,
    routes: Mutex<HashMap<LogicalId, RouteId>>,
}

impl BusCore {
    fn new(config: BusConfig, tx: Box<dyn TxAdapter + Send>) -> Self {
        let metrics = Arc::new(BusMetrics::new());
        Self {
            registry: DeviceRegistry::new(config.protocol),
            correlator: Arc::new(Correlator::new(config.response_timeout(), metrics.clone())),
            telemetry: TelemetryCache::new(),
            router: CanRouter::new(),
            metrics,
            tx: Mutex::new(tx),
            epoch: Instant::now(),
            routes: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// 会话单调时钟（微秒，从 1 开始，0 保留给“无时间戳”）
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64 + 1
    }

    /// 发送一帧；TX 锁只在发送期间持有
    pub(crate) fn transmit(&self, frame: RmdFrame) -> Result<(), CanError> {
        let result = self.tx.lock().send(frame);
        match &result {
            Ok(()) => {
                self.metrics.tx_frames.fetch_add(1, Ordering::Relaxed);
                trace!("TX ID=0x{:03X} data={:02X?}", frame.id, frame.data_slice());
            },
            Err(e) => {
                self.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to send frame to ID 0x{:03X}: {}", frame.id, e);
            },
        }
        result
    }

    fn on_frame_received(&self, mut frame: RmdFrame) {
        if frame.timestamp_us == 0 {
            frame.timestamp_us = self.now_us();
        }
        self.metrics.rx_frames.fetch_add(1, Ordering::Relaxed);
        trace!("RX ID=0x{:03X} data={:02X?}", frame.id, frame.data_slice());

        if self.router.dispatch(&frame) == 0 {
            self.metrics.unrouted.fetch_add(1, Ordering::Relaxed);
            trace!("No listener for CAN ID 0x{:03X}", frame.id);
        }
    }

    /// 设备应答 ID 上的帧：解码、更新遥测、完成在途请求
    fn handle_device_frame(&self, frame: &RmdFrame) {
        let Some(device) = self.registry.device_for_response(frame.id) else {
            return;
        };
        self.registry.mark_confirmed(device);

        let reply = match Reply::try_from(*frame) {
            Ok(reply) => reply,
            Err(e) => {
                self.metrics.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Malformed frame from device {} (ID 0x{:03X}): {}",
                    device, frame.id, e
                );
                return;
            },
        };

        // 先更新缓存再唤醒调用方，调用返回后读取缓存一定能看到这次应答
        if self.telemetry.update(device, &reply, frame.timestamp_us) == UpdateOutcome::Stale {
            self.metrics.stale_discards.fetch_add(1, Ordering::Relaxed);
        }

        // 与注销竞争：设备已移除时不留下遥测
        if self.registry.entry(device).is_err() {
            self.telemetry.remove(device);
            return;
        }

        let key = SlotKey::new(device, reply.opcode);
        if self.correlator.fulfill(key, reply, frame.timestamp_us) > 0 {
            self.metrics.fulfilled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.unsolicited.fetch_add(1, Ordering::Relaxed);
            trace!(
                "Unsolicited {:?} from device {} applied as telemetry",
                reply.opcode, device
            );
        }
    }
}

/// 注册到路由器的设备监听者
///
/// 持有弱引用：路由器属于 `BusCore`，强引用会形成环。
struct DeviceListener {
    core: Weak<BusCore>,
}

impl FrameListener for DeviceListener {
    fn on_frame_received(&self, frame: &RmdFrame) {
        if let Some(core) = self.core.upgrade() {
            core.handle_device_frame(frame);
        }
    }
}

/// RX 线程主循环
fn rx_loop(mut rx: impl RxAdapter, core: Arc<BusCore>, is_running: Arc<AtomicBool>) {
    loop {
        // Acquire: 看到 false 时必须能看到 Drop 之前的全部写入
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        match rx.receive() {
            Ok(frame) => core.on_frame_received(frame),
            Err(CanError::Timeout) => {},
            Err(e) => {
                error!("RX thread: CAN receive error: {}", e);
                if e.is_fatal() {
                    error!("RX thread: Fatal error detected, setting is_running = false");
                    is_running.store(false, Ordering::Release);
                    break;
                }
            },
        }

        core.correlator.poll_timeouts(Instant::now());
    }

    trace!("RX thread: loop exited");
}

/// RMD 总线会话
///
/// ```rust,no_run
/// use rmd_driver::{BusConfig, LogicalId, RmdBus};
/// use rmd_can::SocketCanAdapter;
///
/// let adapter = SocketCanAdapter::new("can0")?;
/// let bus = RmdBus::new(adapter, BusConfig::default())?;
/// bus.register(LogicalId(1), 0x141)?;
///
/// let motor = bus.actuator(LogicalId(1))?;
/// let status = motor.set_velocity(90.0)?;
/// println!("speed: {} dps", status.speed_dps());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RmdBus {
    core: Arc<BusCore>,
    rx_thread: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
}

impl RmdBus {
    /// 创建多线程总线会话
    ///
    /// 分离适配器，启动 RX 线程，并注册配置中的设备。
    ///
    /// # 错误
    /// - `DriverError::Config`: 配置无效
    /// - `DriverError::Bus`: 适配器分离失败
    /// - `DriverError::DuplicateIdentifier` / `InvalidInput`: 配置中的设备无法注册
    /// - `DriverError::IoThread`: 无法创建 RX 线程
    pub fn new<C>(mut can: C, config: BusConfig) -> Result<Self, DriverError>
    where
        C: SplittableAdapter,
        C::RxAdapter: Send + 'static,
        C::TxAdapter: Send + 'static,
    {
        config.validate()?;
        can.set_receive_timeout(config.receive_timeout());
        let (rx, tx) = can.split()?;

        let core = Arc::new(BusCore::new(config, Box::new(tx)));
        let is_running = Arc::new(AtomicBool::new(true));

        let mut bus = Self {
            core: core.clone(),
            rx_thread: None,
            is_running: is_running.clone(),
        };
        bus.register_configured_devices()?;

        let rx_thread = std::thread::Builder::new()
            .name("rmd-rx".to_string())
            .spawn(move || rx_loop(rx, core, is_running))
            .map_err(|e| DriverError::IoThread(e.to_string()))?;
        bus.rx_thread = Some(rx_thread);

        debug!("RMD bus started ({:?})", bus.core.config.protocol);
        Ok(bus)
    }

    /// 创建协作式总线会话（不启动任何线程）
    ///
    /// 持有者负责把收到的帧交给 `on_frame_received`，并定期调用 `poll_timeouts`。
    pub fn manual<T>(tx: T, config: BusConfig) -> Result<Self, DriverError>
    where
        T: TxAdapter + Send + 'static,
    {
        config.validate()?;
        let bus = Self {
            core: Arc::new(BusCore::new(config, Box::new(tx))),
            rx_thread: None,
            is_running: Arc::new(AtomicBool::new(true)),
        };
        bus.register_configured_devices()?;
        Ok(bus)
    }

    fn register_configured_devices(&self) -> Result<(), DriverError> {
        for device in self.core.config.devices.clone() {
            self.register_geared(
                LogicalId(device.logical_id),
                device.arbitration_id,
                device.gear_ratio,
            )?;
        }
        Ok(())
    }

    /// 注册设备并在路由器上监听其应答 ID（减速比 1）
    pub fn register(
        &self,
        logical_id: LogicalId,
        arbitration_id: u16,
    ) -> Result<DeviceEntry, DriverError> {
        self.register_geared(logical_id, arbitration_id, 1.0)
    }

    /// 注册带减速器的设备
    ///
    /// 注册表条目与路由在 `routes` 锁内一起建立，与并发的 `unregister` 互斥。
    pub fn register_geared(
        &self,
        logical_id: LogicalId,
        arbitration_id: u16,
        gear_ratio: f64,
    ) -> Result<DeviceEntry, DriverError> {
        let mut routes = self.core.routes.lock();
        let entry = self.core.registry.register_geared(logical_id, arbitration_id, gear_ratio)?;
        let listener = Arc::new(DeviceListener {
            core: Arc::downgrade(&self.core),
        });
        let route = self.core.router.add_route(entry.response_id as u32, listener);
        routes.insert(logical_id, route);
        Ok(entry)
    }

    /// 注销设备（幂等）
    ///
    /// 同时移除路由、清除该设备的在途请求（等待者收到 `UnknownDevice`）与遥测条目。
    pub fn unregister(&self, logical_id: LogicalId) -> bool {
        let removed = {
            let mut routes = self.core.routes.lock();
            let removed = self.core.registry.unregister(logical_id).is_some();
            if let Some(route) = routes.remove(&logical_id) {
                self.core.router.remove_route(route);
            }
            removed
        };
        let purged = self.core.correlator.purge_device(logical_id);
        self.core.telemetry.remove(logical_id);

        if removed {
            debug!(
                "Device {} unregistered ({} pending requests purged)",
                logical_id, purged
            );
        }
        removed
    }

    /// 获取设备会话
    ///
    /// # 错误
    /// - `DriverError::UnknownDevice`: 设备未注册
    pub fn actuator(&self, logical_id: LogicalId) -> Result<Actuator, DriverError> {
        self.core.registry.entry(logical_id)?;
        Ok(Actuator::new(self.core.clone(), logical_id))
    }

    /// 处理一帧入站数据（协作式模型的接收入口；多线程模型由 RX 线程调用）
    pub fn on_frame_received(&self, frame: RmdFrame) {
        self.core.on_frame_received(frame);
    }

    /// 超时检查，返回超时的槽数量
    pub fn poll_timeouts(&self) -> usize {
        self.poll_timeouts_at(Instant::now())
    }

    pub fn poll_timeouts_at(&self, now: Instant) -> usize {
        self.core.correlator.poll_timeouts(now).len()
    }

    /// 读取设备遥测
    pub fn telemetry(&self, logical_id: LogicalId) -> Result<TelemetrySnapshot, DriverError> {
        self.core.telemetry.read(logical_id)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.core.registry
    }

    /// 路由器（可挂载额外的监听者）
    pub fn router(&self) -> &CanRouter {
        &self.core.router
    }

    pub fn config(&self) -> &BusConfig {
        &self.core.config
    }

    /// 在途请求数量
    pub fn in_flight(&self) -> usize {
        self.core.correlator.in_flight()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// RX 线程是否在运行（协作式会话始终为 `true`，直到 `shutdown`）
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
            && self.rx_thread.as_ref().is_none_or(|h| !h.is_finished())
    }

    /// 停止 RX 线程并等待退出
    pub fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.rx_thread.take()
            && handle.join().is_err()
        {
            error!("RX thread panicked during shutdown");
        }
    }
}

impl Drop for RmdBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
