use core::{
    marker::PhantomData,
    mem,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use std::{
    collections::VecDeque,
    rc::Rc,
    sync::Arc,
    thread::{self, Thread},
};

use system_error::SystemError;

use super::spinlock::SpinLock;

#[derive(Debug)]
struct InnerWaitQueue {
    dead: bool,
    waiters: VecDeque<Arc<Waker>>,
}

/// 等待队列：基于一次性 Waiter/Waker，避免唤醒丢失
#[derive(Debug)]
pub struct WaitQueue {
    inner: SpinLock<InnerWaitQueue>,
    num_waiters: AtomicU32,
}

/// 属于当前线程的等待者，不可跨线程共享
pub struct Waiter {
    waker: Arc<Waker>,
    _nosend: PhantomData<Rc<()>>,
}

/// 可跨线程共享的唤醒器
#[derive(Debug)]
pub struct Waker {
    has_woken: AtomicBool,
    target: Thread,
}

/// 可中断等待的取消令牌
///
/// 宿主环境下没有信号，由另一个线程调用 [`CancelToken::cancel`] 打断等待，
/// 被打断的等待返回 `EINTR`。
#[derive(Debug)]
pub struct CancelToken {
    cancelled: AtomicBool,
    waiters: SpinLock<Vec<Arc<Waker>>>,
}

impl CancelToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            waiters: SpinLock::new(Vec::new()),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let wakers = mem::take(&mut *self.waiters.lock());
        for w in wakers {
            w.wake();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn attach(&self, waker: &Arc<Waker>) {
        self.waiters.lock().push(waker.clone());
    }

    fn detach(&self, waker: &Arc<Waker>) {
        self.waiters.lock().retain(|w| !Arc::ptr_eq(w, waker));
    }
}

#[allow(dead_code)]
impl WaitQueue {
    pub const fn default() -> Self {
        WaitQueue {
            inner: SpinLock::new(InnerWaitQueue::INIT),
            num_waiters: AtomicU32::new(0),
        }
    }

    pub fn register_waker(&self, waker: Arc<Waker>) -> Result<(), SystemError> {
        let mut guard = self.inner.lock();
        if guard.dead {
            return Err(SystemError::ENODEV);
        }
        guard.waiters.push_back(waker);
        self.num_waiters.fetch_add(1, Ordering::Release);
        Ok(())
    }

    pub fn remove_waker(&self, target: &Arc<Waker>) {
        let mut guard = self.inner.lock();
        let before = guard.waiters.len();
        guard.waiters.retain(|w| !Arc::ptr_eq(w, target));
        let removed = before - guard.waiters.len();
        if removed > 0 {
            self.num_waiters
                .fetch_sub(removed as u32, Ordering::Release);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_waiters.load(Ordering::Acquire) == 0
    }

    /// 可中断等待条件成立，`cancel` 被触发时返回 `EINTR`
    pub fn wait_event_interruptible<F>(
        &self,
        mut cond: F,
        cancel: &CancelToken,
    ) -> Result<(), SystemError>
    where
        F: FnMut() -> bool,
    {
        loop {
            if cond() {
                return Ok(());
            }

            let (waiter, waker) = Waiter::new_pair();
            self.register_waker(waker.clone())?;
            cancel.attach(&waker);

            // 条件可能在入队后立即满足，直接摘掉
            if cond() {
                self.remove_waker(&waker);
                cancel.detach(&waker);
                return Ok(());
            }

            if cancel.is_cancelled() {
                self.remove_waker(&waker);
                cancel.detach(&waker);
                return Err(SystemError::EINTR);
            }

            waiter.wait();
            cancel.detach(&waker);

            if cancel.is_cancelled() {
                self.remove_waker(&waker);
                // 取消和满足同时发生时，以条件为准
                if cond() {
                    return Ok(());
                }
                return Err(SystemError::EINTR);
            }
            // 再次循环检查条件，处理伪唤醒
        }
    }

    pub fn wake_one(&self) -> bool {
        if self.is_empty() {
            return false;
        }

        loop {
            let next = {
                let mut guard = self.inner.lock();
                let waker = guard.waiters.pop_front();
                if waker.is_some() {
                    self.num_waiters.fetch_sub(1, Ordering::Release);
                }
                waker
            };

            let Some(waker) = next else { return false };
            if waker.wake() {
                return true;
            }
        }
    }

    pub fn wake_all(&self) -> usize {
        if self.is_empty() {
            return 0;
        }

        let mut drained = VecDeque::new();
        {
            let mut guard = self.inner.lock();
            mem::swap(&mut guard.waiters, &mut drained);
            self.num_waiters.store(0, Ordering::Release);
        }

        let mut woken = 0;
        for w in drained {
            if w.wake() {
                woken += 1;
            }
        }
        woken
    }

    /// 标记等待队列失效，清空并唤醒剩余等待者
    pub fn mark_dead(&self) {
        let mut drained = VecDeque::new();
        {
            let mut guard = self.inner.lock();
            guard.dead = true;
            mem::swap(&mut guard.waiters, &mut drained);
            self.num_waiters.store(0, Ordering::Release);
        }
        for w in drained {
            w.wake();
        }
    }

    pub fn len(&self) -> usize {
        self.num_waiters.load(Ordering::Acquire) as usize
    }
}

impl InnerWaitQueue {
    pub const INIT: InnerWaitQueue = InnerWaitQueue {
        dead: false,
        waiters: VecDeque::new(),
    };
}

impl Waiter {
    pub fn new_pair() -> (Self, Arc<Waker>) {
        let waker = Arc::new(Waker {
            has_woken: AtomicBool::new(false),
            target: thread::current(),
        });
        let waiter = Waiter {
            waker: waker.clone(),
            _nosend: PhantomData,
        };
        (waiter, waker)
    }

    /// 睡眠直到被唤醒。park可能伪唤醒，因此以has_woken为准
    pub fn wait(&self) {
        while !self.waker.consume_wake() {
            thread::park();
        }
    }
}

impl Waker {
    #[inline]
    pub fn wake(&self) -> bool {
        if self.has_woken.swap(true, Ordering::Release) {
            return false;
        }
        self.target.unpark();
        true
    }

    #[inline]
    fn consume_wake(&self) -> bool {
        self.has_woken.swap(false, Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_wait_condition_already_true() {
        let wq = WaitQueue::default();
        let cancel = CancelToken::new();
        assert!(wq.wait_event_interruptible(|| true, &cancel).is_ok());
        assert!(wq.is_empty());
    }

    #[test]
    fn test_wake_all_releases_waiter() {
        let wq = Arc::new(WaitQueue::default());
        let flag = Arc::new(AtomicBool::new(false));
        let cancel = CancelToken::new();

        let handle = {
            let wq = wq.clone();
            let flag = flag.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                wq.wait_event_interruptible(|| flag.load(Ordering::SeqCst), &cancel)
            })
        };

        // 等待者入队后再设置条件
        while wq.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        flag.store(true, Ordering::SeqCst);
        wq.wake_all();
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let wq = Arc::new(WaitQueue::default());
        let cancel = CancelToken::new();

        let handle = {
            let wq = wq.clone();
            let cancel = cancel.clone();
            thread::spawn(move || wq.wait_event_interruptible(|| false, &cancel))
        };

        while wq.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        cancel.cancel();
        assert_eq!(handle.join().unwrap(), Err(SystemError::EINTR));
        assert!(wq.is_empty());
    }

    #[test]
    fn test_dead_queue_rejects_waiters() {
        let wq = WaitQueue::default();
        wq.mark_dead();
        let cancel = CancelToken::new();
        assert_eq!(
            wq.wait_event_interruptible(|| false, &cancel),
            Err(SystemError::ENODEV)
        );
    }
}
