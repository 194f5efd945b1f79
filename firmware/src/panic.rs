use core::panic::PanicInfo;

use crate::status;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let last = status::snapshot();
    defmt::error!(
        "rig halted: {} (state={} offset={=u64}ns cycles={=u32})",
        defmt::Display2Format(info),
        last.state.label(),
        u64::try_from(last.offset.as_nanos()).unwrap_or(u64::MAX),
        last.cycles
    );
    cortex_m::asm::udf();
}
