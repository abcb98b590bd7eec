use crate::core::{PixelFormat, Result, RgbaImage, VideoImage};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 环形缓冲中的一个槽位
#[derive(Debug, Default)]
struct VideoPicture {
    pts: f64,
    image: RgbaImage,
}

struct RingState {
    slots: Vec<VideoPicture>,
    rindex: usize,
    windex: usize,
    size: usize,
    /// 最近一次显示的帧时间戳，即视频时钟
    frame_last_pts: f64,
    /// seek 已清空缓冲，解码线程还没处理到 flush 标记；期间写入的帧一律丢弃
    holding: bool,
}

impl RingState {
    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }
}

/// 已解码视频帧的定长环形缓冲
///
/// 解码线程是唯一生产者，驱动线程通过 `refresh` 消费。
pub struct PictureQueue {
    state: Mutex<RingState>,
    cond: Condvar,
    poll_interval: Duration,
}

impl PictureQueue {
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| VideoPicture::default()).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
                frame_last_pts: 0.0,
                holding: false,
            }),
            cond: Condvar::new(),
            poll_interval,
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame_last_pts(&self) -> f64 {
        self.state.lock().frame_last_pts
    }

    /// seek 时由解封装线程调用：丢弃所有待显示帧。
    /// `hold` 为真时，在 `reset` 之前写入的帧都会被丢弃。
    pub fn clear(&self, hold: bool) {
        let mut state = self.state.lock();
        state.size = 0;
        state.rindex = 0;
        state.windex = 0;
        state.holding = hold;
        self.cond.notify_all();
    }

    /// 解码线程看到 flush 标记时调用：清空并把视频时钟置为新的基准
    pub fn reset(&self, pts: f64) {
        let mut state = self.state.lock();
        state.size = 0;
        state.rindex = 0;
        state.windex = 0;
        state.frame_last_pts = pts;
        state.holding = false;
        self.cond.notify_all();
    }

    /// 阻塞到有空槽位；退出标志置位时返回 false
    pub fn wait_for_slot(&self, quit: &AtomicBool) -> bool {
        let mut state = self.state.lock();
        while state.size >= state.slots.len() && !state.holding && !quit.load(Ordering::SeqCst) {
            self.cond.wait_for(&mut state, self.poll_interval);
        }
        !quit.load(Ordering::SeqCst)
    }

    /// 生产者路径：等槽位 → 在锁外做像素转换 → 交换进槽位
    ///
    /// `spare` 是生产者自己持有的缓冲，和槽位里的缓冲轮换使用，
    /// 所以尺寸不变时不会重新分配内存。
    /// 返回 `Ok(false)` 表示应停止解码（退出中）。
    pub fn queue_picture<F>(
        &self,
        pts: f64,
        quit: &AtomicBool,
        spare: &mut RgbaImage,
        convert: F,
    ) -> Result<bool>
    where
        F: FnOnce(&mut RgbaImage) -> Result<()>,
    {
        if !self.wait_for_slot(quit) {
            return Ok(false);
        }

        convert(spare)?;

        let mut state = self.state.lock();
        if state.holding {
            return Ok(true);
        }
        if state.size >= state.slots.len() {
            // 单生产者下不会发生
            return Ok(true);
        }

        let windex = state.windex;
        let slot = &mut state.slots[windex];
        std::mem::swap(&mut slot.image, spare);
        slot.pts = pts;
        state.windex = state.advance(windex);
        state.size += 1;
        Ok(true)
    }

    /// 消费一步。`master` 为 None 表示视频是主时钟：队首帧总是显示。
    /// 否则跳过已经落后于主时钟的帧，显示第一张不晚的帧。
    /// 返回显示的帧时间戳。
    pub fn refresh<D>(&self, master: Option<f64>, threshold: f64, display: D) -> Option<f64>
    where
        D: FnOnce(VideoImage<'_>),
    {
        let mut state = self.state.lock();
        if state.size == 0 {
            return None;
        }

        let mut skipped = 0;
        if let Some(clock) = master {
            if state.slots[state.rindex].pts > clock + threshold {
                return None;
            }
            while skipped < state.size - 1 && state.slots[state.rindex].pts + threshold <= clock {
                state.rindex = state.advance(state.rindex);
                skipped += 1;
            }
        }

        let rindex = state.rindex;
        let picture = &state.slots[rindex];
        let pts = picture.pts;
        if picture.image.is_allocated() {
            display(VideoImage {
                pts,
                width: picture.image.width,
                height: picture.image.height,
                format: PixelFormat::RGBA,
                data: &picture.image.data,
            });
        }

        state.frame_last_pts = pts;
        state.size -= skipped + 1;
        state.rindex = state.advance(rindex);
        self.cond.notify_one();
        Some(pts)
    }

    /// 释放所有槽位的图像内存
    pub fn release_images(&self) {
        let mut state = self.state.lock();
        for slot in state.slots.iter_mut() {
            slot.image = RgbaImage::default();
        }
        state.size = 0;
        state.rindex = 0;
        state.windex = 0;
    }
}
