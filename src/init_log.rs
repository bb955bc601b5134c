use cortex_m::peripheral::ITM;

#[cfg(not(feature = "semihosting"))]
pub fn init_log(itm: ITM) {
    use log::LevelFilter;
    use cortex_m_log::log::{Logger, init};
    use cortex_m_log::printer::itm::InterruptSync;
    static mut LOGGER: Option<Logger<InterruptSync>> = None;
    let logger = Logger {
        inner: InterruptSync::new(cortex_m_log::destination::Itm::new(itm)),
        level: LevelFilter::Info,
    };
    let logger = unsafe {
        LOGGER.get_or_insert(logger)
    };

    init(logger).expect("set logger");
}

#[cfg(feature = "semihosting")]
pub fn init_log(_itm: ITM) {
    use log::LevelFilter;
    use cortex_m_log::log::{Logger, init};
    use cortex_m_log::printer::semihosting::{InterruptOk, hio::HStdout};
    static mut LOGGER: Option<Logger<InterruptOk<HStdout>>> = None;
    let logger = Logger {
        inner: InterruptOk::<_>::stdout().expect("semihosting stdout"),
        level: LevelFilter::Info,
    };
    let logger = unsafe {
        LOGGER.get_or_insert(logger)
    };

    init(logger).expect("set logger");
}
