use tracing_subscriber::{
    fmt::{format, time::ChronoLocal},
    EnvFilter,
};

pub fn init_log() {
    let format = format::format()
        .with_level(true)
        .with_target(false)
        .with_timer(ChronoLocal::new("[%m-%d %H:%M:%S%.3f]".to_string()))
        .compact();

    let mut env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if let Ok(directive) = "pool_client=debug".parse() {
        env_filter = env_filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(env_filter).event_format(format).init();
}
