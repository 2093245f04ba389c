//! 模拟 CAN 总线（无硬件依赖）
//!
//! `MockCanAdapter` 实现全部适配器 trait，`MockBusHandle` 从测试一侧操纵总线：
//! 注入入站帧、检查已发送帧、注入发送失败、挂载模拟设备应答器。
//!
//! ```rust
//! use rmd_can::{CanAdapter, MockCanAdapter, RmdFrame};
//!
//! let (mut adapter, handle) = MockCanAdapter::new();
//! handle.set_responder(|frame| Some(RmdFrame::new(frame.id, frame.data_slice())));
//!
//! adapter.send(RmdFrame::new(0x141, &[0x9C])).unwrap();
//! assert_eq!(handle.sent_frames().len(), 1);
//! assert_eq!(adapter.receive().unwrap().id, 0x141);
//! ```

use crate::{
    CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, RmdFrame, RxAdapter,
    SplittableAdapter, TxAdapter,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::trace;

type Responder = Box<dyn FnMut(&RmdFrame) -> Option<RmdFrame> + Send>;

struct MockShared {
    inbound_tx: Sender<RmdFrame>,
    sent: Mutex<Vec<RmdFrame>>,
    fail_sends: AtomicUsize,
    responder: Mutex<Option<Responder>>,
}

impl MockShared {
    fn transmit(&self, frame: RmdFrame) -> Result<(), CanError> {
        let pending_failures = self.fail_sends.load(Ordering::Acquire);
        if pending_failures > 0
            && self
                .fail_sends
                .compare_exchange(
                    pending_failures,
                    pending_failures - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            trace!("Mock bus: injected send failure for ID=0x{:X}", frame.id);
            return Err(CanError::BusOff);
        }

        self.sent.lock().push(frame);
        trace!("Mock bus: sent ID=0x{:X}, len={}", frame.id, frame.len);

        let reply = self.responder.lock().as_mut().and_then(|respond| respond(&frame));
        if let Some(reply) = reply {
            let _ = self.inbound_tx.send(reply);
        }
        Ok(())
    }
}

fn receive_from(inbound: &Receiver<RmdFrame>, timeout: Duration) -> Result<RmdFrame, CanError> {
    match inbound.recv_timeout(timeout) {
        Ok(frame) => Ok(frame),
        Err(RecvTimeoutError::Timeout) => Err(CanError::Timeout),
        Err(RecvTimeoutError::Disconnected) => Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NoDevice,
            "mock bus disconnected",
        ))),
    }
}

/// 模拟适配器
pub struct MockCanAdapter {
    inbound_rx: Receiver<RmdFrame>,
    shared: Arc<MockShared>,
    read_timeout: Duration,
}

/// 测试侧的总线句柄（可克隆）
#[derive(Clone)]
pub struct MockBusHandle {
    shared: Arc<MockShared>,
}

impl MockCanAdapter {
    /// 创建模拟适配器及其控制句柄
    pub fn new() -> (Self, MockBusHandle) {
        let (inbound_tx, inbound_rx) = unbounded();
        let shared = Arc::new(MockShared {
            inbound_tx,
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicUsize::new(0),
            responder: Mutex::new(None),
        });

        (
            Self {
                inbound_rx,
                shared: shared.clone(),
                read_timeout: Duration::from_millis(2),
            },
            MockBusHandle { shared },
        )
    }
}

impl MockBusHandle {
    /// 注入一帧入站数据（模拟设备发出）
    pub fn inject(&self, frame: RmdFrame) {
        let _ = self.shared.inbound_tx.send(frame);
    }

    /// 已发送帧的副本
    pub fn sent_frames(&self) -> Vec<RmdFrame> {
        self.shared.sent.lock().clone()
    }

    /// 取走已发送帧
    pub fn take_sent(&self) -> Vec<RmdFrame> {
        std::mem::take(&mut *self.shared.sent.lock())
    }

    pub fn sent_count(&self) -> usize {
        self.shared.sent.lock().len()
    }

    /// 令接下来 `count` 次发送返回 `CanError::BusOff`
    pub fn fail_next_sends(&self, count: usize) {
        self.shared.fail_sends.store(count, Ordering::Release);
    }

    /// 挂载模拟设备：每次成功发送后调用，返回的帧进入入站队列
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&RmdFrame) -> Option<RmdFrame> + Send + 'static,
    {
        *self.shared.responder.lock() = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.shared.responder.lock() = None;
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: RmdFrame) -> Result<(), CanError> {
        self.shared.transmit(frame)
    }

    fn receive(&mut self) -> Result<RmdFrame, CanError> {
        receive_from(&self.inbound_rx, self.read_timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<RmdFrame, CanError> {
        receive_from(&self.inbound_rx, timeout)
    }
}

/// 模拟 RX 半部
pub struct MockRxAdapter {
    inbound_rx: Receiver<RmdFrame>,
    read_timeout: Duration,
}

impl MockRxAdapter {
    /// 非阻塞接收（协作式调度）
    pub fn try_receive(&mut self) -> Option<RmdFrame> {
        self.inbound_rx.try_recv().ok()
    }
}

impl RxAdapter for MockRxAdapter {
    fn receive(&mut self) -> Result<RmdFrame, CanError> {
        receive_from(&self.inbound_rx, self.read_timeout)
    }
}

/// 模拟 TX 半部
pub struct MockTxAdapter {
    shared: Arc<MockShared>,
}

impl TxAdapter for MockTxAdapter {
    fn send(&mut self, frame: RmdFrame) -> Result<(), CanError> {
        self.shared.transmit(frame)
    }
}

impl SplittableAdapter for MockCanAdapter {
    type RxAdapter = MockRxAdapter;
    type TxAdapter = MockTxAdapter;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        Ok((
            MockRxAdapter {
                inbound_rx: self.inbound_rx,
                read_timeout: self.read_timeout,
            },
            MockTxAdapter {
                shared: self.shared,
            },
        ))
    }
}
