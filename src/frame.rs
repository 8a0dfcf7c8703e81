// =============================================================================
// FRAME DRIVER - per-frame state machine
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the in-flight fence of the current slot
// 2. Acquire swapchain image (out of date -> rebuild, skip the frame)
// 3. Submit the pre-recorded command buffer for that image
// 4. Present (out of date / suboptimal / resized -> rebuild)
// 5. Advance to the next slot
//
// The GPU side sits behind `FrameTarget` so the ordering rules can be
// exercised without a device.

use anyhow::Result;

use crate::backend::MAX_FRAMES_IN_FLIGHT;
use crate::window::SurfaceProvider;

/// Outcome of acquiring a swap-chain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Usable image; `suboptimal` still renders correctly
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

/// Outcome of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// GPU operations the frame driver sequences.
///
/// `slot` is always in `0..MAX_FRAMES_IN_FLIGHT`.
pub trait FrameTarget {
    /// Block until the work last submitted with `slot` has finished
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Request the next image; signals the slot's image-available semaphore
    fn acquire(&mut self, slot: usize) -> Result<Acquire>;

    /// Reset the slot's fence and submit the command buffer for `image_index`
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Queue `image_index` for presentation once rendering has finished
    fn present(&mut self, slot: usize, image_index: u32) -> Result<Present>;

    /// Wait for the device to go idle, then replace the swap-chain set.
    /// `window_size` is never zero on either axis.
    fn rebuild(&mut self, window_size: (u32, u32)) -> Result<()>;

    fn wait_idle(&self) -> Result<()>;
}

/// Block in the event wait until the framebuffer has a non-zero area.
///
/// Returns early if the window is asked to close while minimized; the
/// returned size may then still be zero.
pub fn wait_for_drawable_size<S: SurfaceProvider>(surface: &mut S) -> (u32, u32) {
    let mut size = surface.framebuffer_size();
    while (size.0 == 0 || size.1 == 0) && !surface.should_close() {
        surface.wait_events();
        size = surface.framebuffer_size();
    }
    size
}

/// Rebuild the swap-chain set at the current window size
pub fn rebuild<T: FrameTarget, S: SurfaceProvider>(target: &mut T, surface: &mut S) -> Result<()> {
    let (width, height) = wait_for_drawable_size(surface);
    if width == 0 || height == 0 {
        log::debug!("Window closed while minimized, skipping swap chain rebuild");
        return Ok(());
    }

    log::info!("Rebuilding swap chain at {}x{}", width, height);
    target.rebuild((width, height))
}

/// Frame cursor and per-frame policy
pub struct FrameLoop {
    current_frame: usize,
    wait_idle_after_present: bool,
}

impl FrameLoop {
    pub fn new(wait_idle_after_present: bool) -> Self {
        if wait_idle_after_present {
            log::warn!("Waiting for device idle after every present");
        }

        Self {
            current_frame: 0,
            wait_idle_after_present,
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Run one iteration.
    ///
    /// `Ok(true)` when a frame was presented, `Ok(false)` when the frame was
    /// dropped for a rebuild. `Err` is fatal.
    pub fn draw_frame<T: FrameTarget, S: SurfaceProvider>(
        &mut self,
        target: &mut T,
        surface: &mut S,
    ) -> Result<bool> {
        let slot = self.current_frame;

        target.wait_for_slot(slot)?;

        let image_index = match target.acquire(slot)? {
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    log::debug!("Acquired suboptimal image {}", index);
                }
                index
            }
            Acquire::OutOfDate => {
                log::debug!("Swap chain out of date on acquire");
                // This rebuild also covers any pending resize
                surface.take_resized();
                rebuild(target, surface)?;
                return Ok(false);
            }
        };

        target.submit(slot, image_index)?;
        let presented = target.present(slot, image_index)?;

        // Any number of resize events since the last frame collapse into one rebuild
        let resized = surface.take_resized();
        if resized || presented != Present::Optimal {
            log::debug!("Present returned {:?}, resized: {}", presented, resized);
            rebuild(target, surface)?;
        }

        self.current_frame = (slot + 1) % MAX_FRAMES_IN_FLIGHT;

        if self.wait_idle_after_present {
            target.wait_idle()?;
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use winit::keyboard::KeyCode;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Submit(usize, u32),
        Present(usize, u32),
        Rebuild((u32, u32)),
    }

    /// Mock GPU: submissions complete in order, and only when a fence is waited on
    struct MockGpu {
        image_count: u32,
        next_image: u32,
        fence_signaled: [bool; MAX_FRAMES_IN_FLIGHT],
        pending: VecDeque<usize>,
        max_pending: usize,
        swap_sets_built: usize,
        swap_sets_destroyed: usize,
        idle_waits: Cell<usize>,
        acquire_script: VecDeque<Result<Acquire>>,
        present_script: VecDeque<Present>,
        calls: Vec<Call>,
    }

    impl MockGpu {
        fn new(image_count: u32) -> Self {
            Self {
                image_count,
                next_image: 0,
                fence_signaled: [true; MAX_FRAMES_IN_FLIGHT],
                pending: VecDeque::new(),
                max_pending: 0,
                swap_sets_built: 1,
                swap_sets_destroyed: 0,
                idle_waits: Cell::new(0),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                calls: Vec::new(),
            }
        }

        fn live_swap_sets(&self) -> usize {
            self.swap_sets_built - self.swap_sets_destroyed
        }

        fn rebuilds(&self) -> Vec<(u32, u32)> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Rebuild(size) => Some(*size),
                    _ => None,
                })
                .collect()
        }

        fn submitted_slots(&self) -> Vec<usize> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    Call::Submit(slot, _) => Some(*slot),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameTarget for MockGpu {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            while !self.fence_signaled[slot] {
                match self.pending.pop_front() {
                    Some(done) => self.fence_signaled[done] = true,
                    None => bail!("waiting on a fence that will never signal"),
                }
            }
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> Result<Acquire> {
            self.calls.push(Call::Acquire(slot));
            if let Some(scripted) = self.acquire_script.pop_front() {
                return scripted;
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquire::Image {
                index,
                suboptimal: false,
            })
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Submit(slot, image_index));
            assert!(self.fence_signaled[slot], "submitted on an unsignaled fence");
            self.fence_signaled[slot] = false;
            self.pending.push_back(slot);
            self.max_pending = self.max_pending.max(self.pending.len());
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<Present> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present_script.pop_front().unwrap_or(Present::Optimal))
        }

        fn rebuild(&mut self, window_size: (u32, u32)) -> Result<()> {
            self.wait_idle()?;
            self.calls.push(Call::Rebuild(window_size));
            self.swap_sets_destroyed += 1;
            self.swap_sets_built += 1;
            self.next_image = 0;
            Ok(())
        }

        fn wait_idle(&self) -> Result<()> {
            self.idle_waits.set(self.idle_waits.get() + 1);
            Ok(())
        }
    }

    struct MockSurface {
        size: (u32, u32),
        sizes_after_wait: VecDeque<(u32, u32)>,
        close_after_wait: bool,
        resized: bool,
        should_close: bool,
        waits: usize,
    }

    impl MockSurface {
        fn new(size: (u32, u32)) -> Self {
            Self {
                size,
                sizes_after_wait: VecDeque::new(),
                close_after_wait: false,
                resized: false,
                should_close: false,
                waits: 0,
            }
        }

        fn resize(&mut self, width: u32, height: u32) {
            self.size = (width, height);
            self.resized = true;
        }
    }

    impl SurfaceProvider for MockSurface {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.size
        }

        fn poll_events(&mut self) {}

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(size) = self.sizes_after_wait.pop_front() {
                self.size = size;
            }
            if self.close_after_wait {
                self.should_close = true;
            }
        }

        fn take_resized(&mut self) -> bool {
            std::mem::take(&mut self.resized)
        }

        fn should_close(&self) -> bool {
            self.should_close
        }

        fn set_should_close(&mut self, value: bool) {
            self.should_close = value;
        }

        fn is_key_pressed(&self, _key: KeyCode) -> bool {
            false
        }
    }

    #[test]
    fn in_flight_work_never_exceeds_slot_count() {
        let mut gpu = MockGpu::new(3);
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        for _ in 0..25 {
            assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());
            assert!(gpu.pending.len() <= MAX_FRAMES_IN_FLIGHT);
        }

        assert_eq!(gpu.max_pending, MAX_FRAMES_IN_FLIGHT);
        let slots = gpu.submitted_slots();
        assert_eq!(&slots[..4], &[0, 1, 0, 1]);
    }

    #[test]
    fn steps_run_in_order() {
        let mut gpu = MockGpu::new(3);
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        frames.draw_frame(&mut gpu, &mut surface).unwrap();

        assert_eq!(
            gpu.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Submit(0, 0), Call::Present(0, 0)]
        );
        assert_eq!(frames.current_frame(), 1);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_submitting() {
        let mut gpu = MockGpu::new(3);
        gpu.acquire_script.push_back(Ok(Acquire::OutOfDate));
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        assert!(!frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert_eq!(
            gpu.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Rebuild((800, 600))]
        );
        assert_eq!(frames.current_frame(), 0);

        // The next iteration reuses slot 0 and runs normally
        gpu.calls.clear();
        assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert_eq!(
            gpu.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Submit(0, 0), Call::Present(0, 0)]
        );
        assert_eq!(frames.current_frame(), 1);
    }

    #[test]
    fn suboptimal_acquire_still_renders() {
        let mut gpu = MockGpu::new(3);
        gpu.acquire_script.push_back(Ok(Acquire::Image {
            index: 2,
            suboptimal: true,
        }));
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert!(gpu.calls.contains(&Call::Submit(0, 2)));
        assert!(gpu.rebuilds().is_empty());
    }

    #[test]
    fn suboptimal_present_rebuilds_and_advances() {
        let mut gpu = MockGpu::new(3);
        gpu.present_script.push_back(Present::Suboptimal);
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert_eq!(gpu.calls.last(), Some(&Call::Rebuild((800, 600))));
        assert_eq!(gpu.calls[gpu.calls.len() - 2], Call::Present(0, 0));
        assert_eq!(frames.current_frame(), 1);
    }

    #[test]
    fn out_of_date_present_rebuilds() {
        let mut gpu = MockGpu::new(3);
        gpu.present_script.push_back(Present::OutOfDate);
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert_eq!(gpu.rebuilds(), vec![(800, 600)]);
        assert_eq!(frames.current_frame(), 1);
    }

    #[test]
    fn resize_events_between_frames_coalesce() {
        let mut gpu = MockGpu::new(3);
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        frames.draw_frame(&mut gpu, &mut surface).unwrap();
        for step in 1..=5 {
            surface.resize(800 + step * 10, 600 + step * 10);
        }
        frames.draw_frame(&mut gpu, &mut surface).unwrap();
        frames.draw_frame(&mut gpu, &mut surface).unwrap();

        assert_eq!(gpu.rebuilds(), vec![(850, 650)]);
        assert!(!surface.resized);
    }

    #[test]
    fn resize_seen_by_acquire_rebuilds_once() {
        let mut gpu = MockGpu::new(3);
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        frames.draw_frame(&mut gpu, &mut surface).unwrap();
        surface.resize(900, 700);
        gpu.acquire_script.push_back(Ok(Acquire::OutOfDate));

        assert!(!frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());

        assert_eq!(gpu.rebuilds(), vec![(900, 700)]);
        assert!(!surface.resized);
    }

    #[test]
    fn repeated_rebuilds_reach_the_same_steady_state() {
        let run = |rebuilds: usize| {
            let mut gpu = MockGpu::new(3);
            let mut surface = MockSurface::new((800, 600));
            let mut frames = FrameLoop::new(false);

            for _ in 0..rebuilds {
                rebuild(&mut gpu, &mut surface).unwrap();
            }
            gpu.calls.clear();
            for _ in 0..7 {
                frames.draw_frame(&mut gpu, &mut surface).unwrap();
            }
            (
                gpu.live_swap_sets(),
                gpu.pending.len(),
                frames.current_frame(),
                gpu.calls,
            )
        };

        assert_eq!(run(1), run(4));
    }

    #[test]
    fn minimized_window_blocks_until_drawable() {
        let mut gpu = MockGpu::new(3);
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        surface.resize(0, 0);
        surface.sizes_after_wait = VecDeque::from([(0, 0), (0, 0), (640, 480)]);

        assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert_eq!(surface.waits, 3);
        assert_eq!(gpu.rebuilds(), vec![(640, 480)]);
    }

    #[test]
    fn close_while_minimized_skips_rebuild() {
        let mut gpu = MockGpu::new(3);
        let mut surface = MockSurface::new((800, 600));
        surface.close_after_wait = true;
        let mut frames = FrameLoop::new(false);

        surface.resize(0, 0);

        assert!(frames.draw_frame(&mut gpu, &mut surface).unwrap());
        assert_eq!(surface.waits, 1);
        assert!(surface.should_close());
        assert!(gpu.rebuilds().is_empty());
    }

    #[test]
    fn drawable_size_returns_immediately_when_visible() {
        let mut surface = MockSurface::new((1280, 720));
        assert_eq!(wait_for_drawable_size(&mut surface), (1280, 720));
        assert_eq!(surface.waits, 0);
    }

    #[test]
    fn wait_idle_after_present_is_opt_in() {
        let mut surface = MockSurface::new((800, 600));

        let mut gpu = MockGpu::new(3);
        let mut frames = FrameLoop::new(false);
        frames.draw_frame(&mut gpu, &mut surface).unwrap();
        frames.draw_frame(&mut gpu, &mut surface).unwrap();
        assert_eq!(gpu.idle_waits.get(), 0);

        let mut gpu = MockGpu::new(3);
        let mut frames = FrameLoop::new(true);
        frames.draw_frame(&mut gpu, &mut surface).unwrap();
        frames.draw_frame(&mut gpu, &mut surface).unwrap();
        assert_eq!(gpu.idle_waits.get(), 2);
    }

    #[test]
    fn acquire_failure_is_fatal() {
        let mut gpu = MockGpu::new(3);
        gpu.acquire_script
            .push_back(Err(anyhow::anyhow!("device lost")));
        let mut surface = MockSurface::new((800, 600));
        let mut frames = FrameLoop::new(false);

        assert!(frames.draw_frame(&mut gpu, &mut surface).is_err());
        assert!(gpu.submitted_slots().is_empty());
        assert_eq!(frames.current_frame(), 0);
    }
}
