/// Build-time settings of the bootloader. There is no runtime
/// configuration surface: everything the firmware needs is fixed here.
#[derive(Clone, Copy, Debug)]
pub struct BootConfig {
    /// Start of the application image (its vector table)
    pub app_base: u32,
    /// End of the flash region the application may occupy (exclusive)
    pub app_end: u32,
    /// Mask applied to the initial stack pointer candidate
    pub sp_mask: u32,
    /// Masked stack pointer value of a plausible image
    pub sp_expected: u32,
    /// First word of the factory-programmed unique device id
    #[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
    pub unique_id_addr: u32,
    pub vid: u16,
    pub pid: u16,
    pub device_release: u16,
    pub manufacturer: &'static str,
    pub product: &'static str,
    /// DfuSe memory layout, reported as the DFU interface string
    pub memory_layout: &'static str,
    /// wTransferSize of the DFU functional descriptor
    pub transfer_size: u16,
}

pub const CONFIG: BootConfig = BootConfig {
    app_base: 0x0800_4000,
    app_end: 0x0810_0000,
    sp_mask: 0x2FFE_0000,
    sp_expected: 0x2000_0000,
    unique_id_addr: 0x1FFF_7A10,
    // STMicroelectronics DFU mode, understood by dfu-util out of the box
    vid: 0x0483,
    pid: 0xDF11,
    device_release: 0x0200,
    manufacturer: "dfu-boot",
    product: "DFU bootloader",
    memory_layout: "@Internal Flash  /0x08000000/01*016Ka,03*016Kg,01*064Kg,07*128Kg",
    transfer_size: 2048,
};

/// Sector layout of the 1 MiB STM32F40x flash bank: (start offset, size)
pub const FLASH_SECTORS: [(u32, u32); 12] = [
    (0x0_0000, 0x4000),
    (0x0_4000, 0x4000),
    (0x0_8000, 0x4000),
    (0x0_C000, 0x4000),
    (0x1_0000, 0x1_0000),
    (0x2_0000, 0x2_0000),
    (0x4_0000, 0x2_0000),
    (0x6_0000, 0x2_0000),
    (0x8_0000, 0x2_0000),
    (0xA_0000, 0x2_0000),
    (0xC_0000, 0x2_0000),
    (0xE_0000, 0x2_0000),
];

pub const FLASH_BASE: u32 = 0x0800_0000;

/// Index of the flash sector containing `addr`
pub fn sector_of(addr: u32) -> Option<u8> {
    let offset = addr.checked_sub(FLASH_BASE)?;
    FLASH_SECTORS.iter()
        .position(|&(start, size)| offset >= start && offset < start + size)
        .map(|i| i as u8)
}
