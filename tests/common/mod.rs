#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use threlte::camera::Camera;
use threlte::renderer::Renderer;
use threlte::settings::Size;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Everything a [`RecordingRenderer`] was asked to do.
#[derive(Debug, Default)]
pub struct RenderLog {
    pub renders: Vec<String>,
    pub sizes: Vec<Size>,
    pub pixel_ratios: Vec<f32>,
    pub disposed: usize,
}

pub struct RecordingRenderer {
    log: Rc<RefCell<RenderLog>>,
}

impl RecordingRenderer {
    pub fn new() -> (Self, Rc<RefCell<RenderLog>>) {
        let log = Rc::new(RefCell::new(RenderLog::default()));
        (Self { log: Rc::clone(&log) }, log)
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, camera: &Camera) {
        self.log.borrow_mut().renders.push(camera.name.to_string());
    }

    fn set_size(&mut self, size: Size) {
        self.log.borrow_mut().sizes.push(size);
    }

    fn set_pixel_ratio(&mut self, dpr: f32) {
        self.log.borrow_mut().pixel_ratios.push(dpr);
    }

    fn dispose(&mut self) {
        self.log.borrow_mut().disposed += 1;
    }
}

/// Small deterministic generator for randomized checks.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }

    pub fn chance(&mut self, percent: u64) -> bool {
        self.next_u64() % 100 < percent
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }
}
