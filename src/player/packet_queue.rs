use crate::core::QueuedPacket;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// `PacketQueue::get` 的三种结果
#[derive(Debug)]
pub enum QueueGet {
    /// 取到一个元素（数据包或 flush 标记）
    Packet(QueuedPacket),
    /// 队列已进入 flushing 状态且为空
    Flushed,
    /// 外部退出标志已置位
    Stopped,
}

struct QueueState {
    packets: VecDeque<QueuedPacket>,
    size: usize,            // 所有数据包字节数之和
    flushing: bool,
    consumer_busy: bool,    // 消费者取走了包但还没回来取下一个
}

/// 线程安全的压缩包 FIFO
///
/// - `put` 追加到队尾并唤醒一个等待的消费者
/// - `get` 阻塞直到有元素、队列 flushing 或退出标志置位
/// - `flush` 只标记并唤醒，不移除元素
/// - `clear` 原子地清空队列
pub struct PacketQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    space: Condvar,
    poll_interval: Duration,
}

impl PacketQueue {
    /// `poll_interval` 决定阻塞中的 `get` 最迟多久能发现退出标志
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                size: 0,
                flushing: false,
                consumer_busy: false,
            }),
            available: Condvar::new(),
            space: Condvar::new(),
            poll_interval,
        }
    }

    pub fn put(&self, packet: QueuedPacket) {
        let mut state = self.state.lock();
        state.size += packet.size();
        state.packets.push_back(packet);
        self.available.notify_one();
    }

    pub fn get(&self, quit: &AtomicBool) -> QueueGet {
        let mut state = self.state.lock();
        state.consumer_busy = false;
        while !quit.load(Ordering::SeqCst) {
            if let Some(packet) = state.packets.pop_front() {
                state.size -= packet.size();
                state.consumer_busy = true;
                self.space.notify_all();
                return QueueGet::Packet(packet);
            }

            if state.flushing {
                return QueueGet::Flushed;
            }
            self.available.wait_for(&mut state, self.poll_interval);
        }
        QueueGet::Stopped
    }

    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.flushing = true;
        self.available.notify_all();
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.packets.clear();
        state.size = 0;
        self.space.notify_all();
    }

    /// 等待队列字节数降到 `limit` 以下，最多等待 `timeout`；返回是否已低于上限
    pub fn wait_for_space(&self, limit: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.size > limit {
            if self.space.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.size <= limit
    }

    pub fn byte_size(&self) -> usize {
        self.state.lock().size
    }

    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 队列为空且消费者不在处理包
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.packets.is_empty() && !state.consumer_busy
    }

    pub fn is_flushing(&self) -> bool {
        self.state.lock().flushing
    }
}
