//! Inline, type-erased `FnOnce` storage.
//!
//! Task bodies are captured into a fixed-size inline buffer rather than a
//! heap-boxed trait object, so creating and publishing a task never
//! allocates. A closure that does not fit in the buffer is rejected at
//! build time with [`SchedulerError::ClosureTooLarge`].

use crate::error::{Result, SchedulerError};
use std::cell::UnsafeCell;
use std::mem::{align_of, size_of, MaybeUninit};

/// Size of the inline closure-capture buffer. The data-model calls for "at
/// least 64 bytes"; 64 is what this crate uses.
pub const USER_ARG_BYTES: usize = 64;

type Trampoline<Ctx> = unsafe fn(*mut u8, &Ctx);
type Dropper = unsafe fn(*mut u8);

/// Inline storage for a single `FnOnce(&Ctx) + Send + 'static` closure.
#[repr(align(8))]
pub struct InlineClosure<Ctx> {
    buf: UnsafeCell<[MaybeUninit<u8>; USER_ARG_BYTES]>,
    call: Option<Trampoline<Ctx>>,
    drop_fn: Option<Dropper>,
}

// Safety: the buffer's contents are only ever touched by whichever single
// thread currently holds logical ownership of the slot (the creator before
// publish, then whichever worker executes the task); `Send` on the stored
// `F` is required by `set`, matching the cross-thread handoff.
unsafe impl<Ctx> Send for InlineClosure<Ctx> {}
unsafe impl<Ctx> Sync for InlineClosure<Ctx> {}

impl<Ctx> InlineClosure<Ctx> {
    pub fn empty() -> Self {
        Self {
            buf: UnsafeCell::new([MaybeUninit::uninit(); USER_ARG_BYTES]),
            call: None,
            drop_fn: None,
        }
    }

    /// Store `f`, replacing (and dropping) whatever was stored before.
    pub fn set<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&Ctx) + Send + 'static,
    {
        self.clear();
        if size_of::<F>() > USER_ARG_BYTES || align_of::<F>() > align_of::<u64>() {
            return Err(SchedulerError::ClosureTooLarge {
                size: size_of::<F>(),
                limit: USER_ARG_BYTES,
            });
        }
        unsafe {
            let ptr = self.buf.get() as *mut F;
            ptr.write(f);
        }
        self.call = Some(Self::trampoline::<F>);
        self.drop_fn = Some(Self::dropper::<F>);
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.call.is_some()
    }

    /// Invoke and consume the stored closure. Must only be called once per
    /// `set`; calling it without a prior `set` panics.
    pub fn call_once(&mut self, ctx: &Ctx) {
        let call = self
            .call
            .take()
            .expect("InlineClosure::call_once invoked with nothing stored");
        self.drop_fn = None; // the trampoline both reads-out and runs the value
        let ptr = self.buf.get() as *mut u8;
        // Safety: `call` was produced by `set::<F>` together with a write
        // of a live `F` into `buf`, and is only ever invoked once (enforced
        // by the `take()` above).
        unsafe {
            call(ptr, ctx);
        }
    }

    pub(crate) fn clear(&mut self) {
        if let Some(drop_fn) = self.drop_fn.take() {
            let ptr = self.buf.get() as *mut u8;
            // Safety: `drop_fn` was produced alongside a write of a live
            // value into `buf` that has not yet been consumed by
            // `call_once` (otherwise `drop_fn` would already be `None`).
            unsafe {
                drop_fn(ptr);
            }
        }
        self.call = None;
    }

    unsafe fn trampoline<F: FnOnce(&Ctx) + Send + 'static>(ptr: *mut u8, ctx: &Ctx) {
        // Safety: caller guarantees `ptr` points at a live, properly
        // initialized `F` written by `set::<F>`.
        let f = unsafe { (ptr as *mut F).read() };
        f(ctx);
    }

    unsafe fn dropper<F>(ptr: *mut u8) {
        // Safety: see `trampoline`.
        unsafe {
            std::ptr::drop_in_place(ptr as *mut F);
        }
    }
}

impl<Ctx> Drop for InlineClosure<Ctx> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<Ctx> Default for InlineClosure<Ctx> {
    fn default() -> Self {
        Self::empty()
    }
}
