use reelshade::effect::Effect;
use reelshade::error::RenderError;
use reelshade::frame::VideoFrame;
use reelshade::output::{CpuRenderer, FrameReadback};
use reelshade::render::{RenderLoop, RenderState, TickOutcome, ViewportGeometry};
use reelshade::source::{StillSource, VideoSource};
use std::time::{Duration, Instant};

fn gray_loop(width: u32, height: u32) -> RenderLoop<CpuRenderer, StillSource> {
    let source = StillSource::new(VideoFrame::solid(64, 64, [128, 128, 128]));
    let mut render = RenderLoop::new(CpuRenderer::new(), source, ViewportGeometry::new(width, height));
    render.mount();
    render
}

fn center(render: &RenderLoop<CpuRenderer, StillSource>) -> [f32; 3] {
    let out = render.backend().last_output().expect("a frame was drawn");
    let px = out.pixel(out.width / 2, out.height / 2);
    [px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0]
}

fn assert_close(actual: [f32; 3], expected: [f32; 3], tolerance: f32) {
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tolerance, "{:?} vs {:?}", actual, expected);
    }
}

#[test]
fn mid_gray_through_tritone_lands_on_the_mid_anchor() {
    let mut render = gray_loop(64, 64);
    render.set_effect(1);
    assert_eq!(render.tick(Instant::now()), Ok(TickOutcome::Drawn));
    assert_close(center(&render), [0.8, 0.3, 0.1], 0.01);
}

#[test]
fn switching_effects_keeps_the_source_and_texture() {
    let mut render = gray_loop(64, 64);
    render.set_effect(1);
    render.tick(Instant::now()).unwrap();
    let tritone = center(&render);

    render.set_effect(3);
    render.tick(Instant::now()).unwrap();
    let solarized = center(&render);

    assert_ne!(tritone, solarized);
    // Inverted gray times the red gain.
    assert_close(solarized, [0.548, 0.448, 0.598], 0.01);

    let stats = render.backend().stats();
    assert_eq!(stats.textures_created, 1);
    assert_eq!(stats.releases, 0);
    assert_eq!(render.state(), RenderState::Rendering);
}

#[test]
fn unknown_selector_is_pass_through() {
    let mut render = gray_loop(32, 18);
    render.set_effect(-7);
    render.tick(Instant::now()).unwrap();
    assert_eq!(render.effect(), Effect::None);
    assert_close(center(&render), [128.0 / 255.0; 3], 1e-6);
}

#[test]
fn every_effect_renders_a_full_viewport() {
    let viewports = [(40, 30), (30, 40), (48, 27)];
    for &(w, h) in &viewports {
        for effect in Effect::ALL {
            let mut render = gray_loop(w, h);
            render.set_effect(i64::from(effect.selector()));
            render.tick(Instant::now()).unwrap();
            let out = render.backend().last_output().unwrap();
            assert_eq!((out.width, out.height), (w, h), "{}", effect);
            assert!(out.validate().is_ok());
        }
    }
}

#[test]
fn teardown_releases_the_texture_and_freezes_the_loop() {
    let mut render = gray_loop(16, 9);
    let t0 = Instant::now();
    for i in 0..3 {
        render.tick(t0 + Duration::from_millis(i * 33)).unwrap();
    }
    assert_eq!(render.backend().live_textures(), 1);

    render.teardown();
    render.teardown();
    assert_eq!(render.state(), RenderState::TornDown);
    assert_eq!(render.backend().live_textures(), 0);
    assert_eq!(render.backend().stats().releases, 1);

    assert_eq!(render.tick(t0 + Duration::from_secs(1)), Ok::<_, RenderError>(TickOutcome::Idle));
    assert_eq!(render.backend().stats().draws, 3);
}

#[test]
fn ready_notification_waits_for_settle() {
    use std::cell::Cell;
    use std::rc::Rc;

    let mut render = gray_loop(16, 9).with_settle_delay(Duration::from_millis(100));
    let ready = Rc::new(Cell::new(false));
    let flag = ready.clone();
    render.on_ready(move || flag.set(true));

    let t0 = Instant::now();
    render.tick(t0).unwrap();
    assert!(!ready.get());
    render.tick(t0 + Duration::from_millis(120)).unwrap();
    assert!(ready.get());
}

#[test]
fn still_image_locator_round_trips_through_disk() {
    let path = std::env::temp_dir().join(format!("reelshade-still-{}.png", std::process::id()));
    VideoFrame::solid(32, 18, [10, 200, 30]).save(&path).unwrap();

    let video = VideoSource::new(path.to_str().unwrap()).unwrap();
    assert!(video.locator.is_still_image());
    let source = video.open().unwrap();

    let mut render = RenderLoop::new(CpuRenderer::new(), source, ViewportGeometry::new(32, 18));
    render.mount();
    render.tick(Instant::now()).unwrap();
    let out = render.backend().last_output().unwrap();
    assert_eq!(out.pixel(16, 9), [10, 200, 30, 255]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn frame_larger_than_the_device_limit_stops_the_loop() {
    let source = StillSource::new(VideoFrame::solid(3840, 2160, [90, 90, 90]));
    let backend = CpuRenderer::new().with_max_texture_dimension(2048);
    let mut render = RenderLoop::new(backend, source, ViewportGeometry::new(64, 36));
    render.mount();

    let err = render.tick(Instant::now()).unwrap_err();
    assert_eq!(err, RenderError::TextureTooLarge { width: 3840, height: 2160, max: 2048 });
    assert_eq!(render.state(), RenderState::TornDown);
    assert_eq!(render.fault(), Some(&err));
    assert_eq!(render.backend().live_textures(), 0);
    assert_eq!(render.tick(Instant::now()), Ok(TickOutcome::Idle));
}
