//! Windowed viewer: a disk galaxy simulated and drawn by the bloom particle pipeline.

mod camera;
mod config;
mod error;
mod event_loop;
mod galaxy;
mod gpu_manager;

fn main() {
    env_logger::init();

    let config = config::ViewerConfig::default();
    let result = pollster::block_on(gpu_manager::GPUManager::setup(&config))
        .and_then(|(setup, event_loop)| setup.start(event_loop, &config));
    if let Err(error) = result {
        log::error!("{error}");
        std::process::exit(1);
    }
}
