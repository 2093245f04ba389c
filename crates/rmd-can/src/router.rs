//! CAN 帧路由器
//!
//! 一条物理总线上的每一帧对所有监听者可见。路由器按仲裁 ID 把入站帧分发给
//! 注册的监听者，使多个逻辑消费者（执行器会话、录制工具等）共享同一总线实例。
//!
//! # 使用示例
//!
//! ```rust
//! use rmd_can::{CanRouter, FrameListener, RmdFrame};
//! use crossbeam_channel::{Sender, unbounded};
//! use std::sync::Arc;
//!
//! struct Forward(Sender<RmdFrame>);
//!
//! impl FrameListener for Forward {
//!     fn on_frame_received(&self, frame: &RmdFrame) {
//!         let _ = self.0.try_send(*frame);
//!     }
//! }
//!
//! let router = CanRouter::new();
//! let (tx, rx) = unbounded();
//! router.add_route(0x141, Arc::new(Forward(tx)));
//!
//! assert_eq!(router.dispatch(&RmdFrame::new(0x141, &[0x9C])), 1);
//! assert_eq!(router.dispatch(&RmdFrame::new(0x142, &[0x9C])), 0);
//! assert_eq!(rx.try_recv().unwrap().id, 0x141);
//! ```

use crate::RmdFrame;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// 帧监听者
///
/// 回调在 RX 线程上执行，实现必须快速返回，禁止阻塞。
pub trait FrameListener: Send + Sync {
    /// 当路由器分发一帧时调用
    fn on_frame_received(&self, frame: &RmdFrame);
}

/// 路由句柄（用于移除）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u64);

struct Route {
    id: RouteId,
    listener: Arc<dyn FrameListener>,
}

#[derive(Default)]
struct RouteTable {
    by_id: HashMap<u32, SmallVec<[Route; 2]>>,
    promiscuous: Vec<Route>,
}

/// 按仲裁 ID 分发入站帧的路由器
#[derive(Default)]
pub struct CanRouter {
    routes: RwLock<RouteTable>,
    next_id: AtomicU64,
}

impl CanRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> RouteId {
        RouteId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// 为指定仲裁 ID 注册监听者
    pub fn add_route(&self, can_id: u32, listener: Arc<dyn FrameListener>) -> RouteId {
        let id = self.allocate_id();
        self.routes
            .write()
            .by_id
            .entry(can_id)
            .or_default()
            .push(Route { id, listener });
        trace!("Route {:?} added for CAN ID 0x{:X}", id, can_id);
        id
    }

    /// 注册接收所有帧的监听者
    pub fn add_promiscuous(&self, listener: Arc<dyn FrameListener>) -> RouteId {
        let id = self.allocate_id();
        self.routes.write().promiscuous.push(Route { id, listener });
        trace!("Promiscuous route {:?} added", id);
        id
    }

    /// 移除路由，返回是否存在
    pub fn remove_route(&self, route: RouteId) -> bool {
        let mut table = self.routes.write();
        let mut removed = false;

        table.by_id.retain(|_, routes| {
            let before = routes.len();
            routes.retain(|r| r.id != route);
            removed |= routes.len() != before;
            !routes.is_empty()
        });

        let before = table.promiscuous.len();
        table.promiscuous.retain(|r| r.id != route);
        removed |= table.promiscuous.len() != before;

        removed
    }

    /// 分发一帧，返回收到该帧的监听者数量
    ///
    /// 监听者在释放路由表锁之后调用，回调内可以增删路由。
    pub fn dispatch(&self, frame: &RmdFrame) -> usize {
        let listeners: SmallVec<[Arc<dyn FrameListener>; 4]> = {
            let table = self.routes.read();
            table
                .by_id
                .get(&frame.id)
                .into_iter()
                .flatten()
                .chain(table.promiscuous.iter())
                .map(|r| r.listener.clone())
                .collect()
        };

        for listener in &listeners {
            listener.on_frame_received(frame);
        }
        listeners.len()
    }

    /// 已注册路由总数
    pub fn route_count(&self) -> usize {
        let table = self.routes.read();
        table.by_id.values().map(|r| r.len()).sum::<usize>() + table.promiscuous.len()
    }

    /// 是否存在指定仲裁 ID 的路由
    pub fn has_route(&self, can_id: u32) -> bool {
        self.routes.read().by_id.contains_key(&can_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<u32>>);

    impl FrameListener for Collect {
        fn on_frame_received(&self, frame: &RmdFrame) {
            self.0.lock().push(frame.id);
        }
    }

    #[test]
    fn test_dispatch_by_id() {
        let router = CanRouter::new();
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        router.add_route(0x141, a.clone());
        router.add_route(0x142, b.clone());

        router.dispatch(&RmdFrame::new(0x141, &[1]));
        router.dispatch(&RmdFrame::new(0x142, &[2]));
        router.dispatch(&RmdFrame::new(0x143, &[3]));

        assert_eq!(*a.0.lock(), vec![0x141]);
        assert_eq!(*b.0.lock(), vec![0x142]);
    }

    #[test]
    fn test_promiscuous_sees_everything() {
        let router = CanRouter::new();
        let all = Arc::new(Collect::default());
        router.add_promiscuous(all.clone());
        router.add_route(0x141, Arc::new(Collect::default()));

        assert_eq!(router.dispatch(&RmdFrame::new(0x141, &[])), 2);
        assert_eq!(router.dispatch(&RmdFrame::new(0x7FF, &[])), 1);
        assert_eq!(*all.0.lock(), vec![0x141, 0x7FF]);
    }

    #[test]
    fn test_multiple_listeners_same_id() {
        let router = CanRouter::new();
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        router.add_route(0x241, a.clone());
        router.add_route(0x241, b.clone());

        assert_eq!(router.dispatch(&RmdFrame::new(0x241, &[])), 2);
        assert_eq!(a.0.lock().len(), 1);
        assert_eq!(b.0.lock().len(), 1);
    }

    #[test]
    fn test_remove_route() {
        let router = CanRouter::new();
        let listener = Arc::new(Collect::default());
        let route = router.add_route(0x141, listener.clone());
        let promiscuous = router.add_promiscuous(listener.clone());
        assert_eq!(router.route_count(), 2);
        assert!(router.has_route(0x141));

        assert!(router.remove_route(route));
        assert!(!router.remove_route(route));
        assert!(!router.has_route(0x141));
        assert!(router.remove_route(promiscuous));
        assert_eq!(router.route_count(), 0);
        assert_eq!(router.dispatch(&RmdFrame::new(0x141, &[])), 0);
    }

    #[test]
    fn test_listener_may_modify_routes() {
        struct SelfRemoving {
            router: Arc<CanRouter>,
            route: Mutex<Option<RouteId>>,
        }

        impl FrameListener for SelfRemoving {
            fn on_frame_received(&self, _frame: &RmdFrame) {
                if let Some(route) = self.route.lock().take() {
                    self.router.remove_route(route);
                }
            }
        }

        let router = Arc::new(CanRouter::new());
        let listener = Arc::new(SelfRemoving {
            router: router.clone(),
            route: Mutex::new(None),
        });
        let route = router.add_route(0x141, listener.clone());
        *listener.route.lock() = Some(route);

        assert_eq!(router.dispatch(&RmdFrame::new(0x141, &[])), 1);
        assert_eq!(router.dispatch(&RmdFrame::new(0x141, &[])), 0);
    }
}
