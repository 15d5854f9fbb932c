//! System commands: the fixed, index-addressed host-function table.
//!
//! The enumeration order is the on-disk contract between assembler and VM;
//! a `sys id argc` instruction calls entry `id` with `argc` stack slots.
//! The core installs console-safe implementations (I/O, time, randomness,
//! string manipulation, table utilities); windowing, graphics, audio and
//! the other device-facing entries stay empty until a host registers them.

use strum::{EnumCount, IntoEnumIterator};

use crate::error::RuntimeFault;
use crate::interpreter::Vm;
use crate::table::Key;
use crate::value::{format_number, Value};
use crate::NativeFn;

/// Index contract for the built-in host-function table.
///
/// Do not reorder: programs address these functions by discriminant.
/// `W3dRender` in particular is pinned at 124 by existing callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumCount, strum::EnumIter)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum SysCommand {
    Pln = 0,
    ReadLine,
    DateTime,
    Time,
    Clock,
    Sleep,
    FrameSleep,
    Rnd,
    Randomize,
    System,
    Capture,
    SplitStr,
    LeftStr,
    RightStr,
    MidStr,
    InStr,
    ReplaceStr,
    LowerStr,
    UpperStr,
    Chr,
    Asc,
    Str,
    TblHasKey,
    TblHasValue,
    TblKeyOf,
    TblFreeKey,
    TblFreeValue,
    TblClear,
    TblInsert,
    SetClipboard,
    GetClipboard,
    CreateFile,
    CreateFileLegacy,
    OpenFile,
    OpenFileLegacy,
    FreeFile,
    FileExists,
    FileWrite,
    FileWriteLine,
    FileRead,
    FileReadChar,
    FileReadLine,
    OpenFileDialog,
    SaveFileDialog,
    CheckFileExists,
    SetWindow,
    SetRedraw,
    WinActive,
    WinExists,
    ScreenW,
    ScreenH,
    WinRedraw,
    MouseX,
    MouseY,
    MouseDown,
    SetMouse,
    CreateZone,
    CreateZoneLegacy,
    FreeZone,
    Zone,
    ZoneX,
    ZoneY,
    ZoneW,
    ZoneH,
    Inkey,
    KeyDown,
    SetImage,
    SetImageClipRect,
    ClearImageClipRect,
    SetColor,
    SetAdditive,
    Cls,
    SetPixel,
    GetPixel,
    DrawPixel,
    DrawLine,
    DrawRect,
    DrawEllipse,
    DrawPolygon,
    DrawVRaster,
    DrawHRaster,
    LoadImage,
    LoadImageLegacy,
    SaveImage,
    CreateImage,
    CreateImageLegacy,
    FreeImage,
    SetImageColorKey,
    SetImageGrid,
    ImageExists,
    ImageWidth,
    ImageHeight,
    ImageCols,
    ImageRows,
    ImageCells,
    DrawImage,
    CreateFont,
    CreateFontLegacy,
    LoadFont,
    LoadFontLegacy,
    SaveFont,
    FreeFont,
    SetFont,
    FontExists,
    FontWidth,
    FontHeight,
    Scroll,
    Write,
    WriteLine,
    Center,
    SetJustification,
    SetCaret,
    LoadSound,
    LoadSoundLegacy,
    FreeSound,
    SoundExists,
    PlaySound,
    LoadMusic,
    LoadMusicLegacy,
    FreeMusic,
    MusicExists,
    PlayMusic,
    StopMusic,
    SetMusicVolume,
    W3dRender,
    CreateSound,
    CreateSoundLegacy,
    Download,
    Console,
    DrawImageTransformed,
    DrawPolygonImage,
    MouseDx,
    MouseDy,
    GetPixelInt,
    SetColorInt,
    DrawPolygonTransformed,
    DrawPolygonImageTransformed,
    JoyX,
    JoyY,
    JoyButton,
    FileTell,
    FileSeek,
}

impl SysCommand {
    /// The command at a raw table index, if any.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }
}

/// The host-function table addressed by `SYS` instructions.
pub struct SysTable {
    entries: Vec<Option<NativeFn>>,
}

impl Default for SysTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl SysTable {
    /// A table with every entry unpopulated.
    pub fn empty() -> Self {
        Self {
            entries: (0..SysCommand::COUNT).map(|_| None).collect(),
        }
    }

    /// A table with the console-safe core set installed.
    pub fn console() -> Self {
        let mut table = Self::empty();
        table.register(SysCommand::Pln, Box::new(sys_pln));
        table.register(SysCommand::ReadLine, Box::new(sys_read_line));
        table.register(SysCommand::DateTime, Box::new(sys_date_time));
        table.register(SysCommand::Time, Box::new(sys_time));
        table.register(SysCommand::Clock, Box::new(sys_clock));
        table.register(SysCommand::Sleep, Box::new(sys_sleep));
        table.register(SysCommand::Rnd, Box::new(sys_rnd));
        table.register(SysCommand::Randomize, Box::new(sys_randomize));
        table.register(SysCommand::SplitStr, Box::new(sys_split_str));
        table.register(SysCommand::LeftStr, Box::new(sys_left_str));
        table.register(SysCommand::RightStr, Box::new(sys_right_str));
        table.register(SysCommand::MidStr, Box::new(sys_mid_str));
        table.register(SysCommand::InStr, Box::new(sys_in_str));
        table.register(SysCommand::ReplaceStr, Box::new(sys_replace_str));
        table.register(SysCommand::LowerStr, Box::new(sys_lower_str));
        table.register(SysCommand::UpperStr, Box::new(sys_upper_str));
        table.register(SysCommand::Chr, Box::new(sys_chr));
        table.register(SysCommand::Asc, Box::new(sys_asc));
        table.register(SysCommand::Str, Box::new(sys_str));
        table.register(SysCommand::TblHasKey, Box::new(sys_tbl_has_key));
        table.register(SysCommand::TblHasValue, Box::new(sys_tbl_has_value));
        table.register(SysCommand::TblKeyOf, Box::new(sys_tbl_key_of));
        table.register(SysCommand::TblFreeKey, Box::new(sys_tbl_free_key));
        table.register(SysCommand::TblFreeValue, Box::new(sys_tbl_free_value));
        table.register(SysCommand::TblClear, Box::new(sys_tbl_clear));
        table.register(SysCommand::TblInsert, Box::new(sys_tbl_insert));
        table
    }

    /// Installs or replaces the function behind a command.
    pub fn register(&mut self, command: SysCommand, function: NativeFn) {
        self.entries[command as usize] = Some(function);
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<NativeFn> {
        self.entries.get_mut(index)?.take()
    }

    pub(crate) fn put_back(&mut self, index: usize, function: NativeFn) {
        self.entries[index] = Some(function);
    }
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Unset)
}

fn table_arg(args: &[Value], index: usize) -> Result<crate::TableId, RuntimeFault> {
    arg(args, index)
        .table_id()
        .ok_or_else(|| RuntimeFault::runtime("Argument is not a table"))
}

/// Builds a table key out of a string or numeric argument.
fn key_arg(args: &[Value], index: usize) -> Result<Key, RuntimeFault> {
    match arg(args, index) {
        Value::Str(s) => Ok(Key::Str(s.clone())),
        Value::Num(n) => Ok(Key::Int(*n as i64)),
        _ => Err(RuntimeFault::runtime(
            "Argument is no identifier or index",
        )),
    }
}

fn sys_pln(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let mut line = match args {
        [] => String::new(),
        _ => vm.display(arg(args, 0)),
    };
    line.push('\n');
    vm.write_output(&line);
    Ok(Value::Unset)
}

fn sys_read_line(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeFault> {
    Ok(Value::Str(vm.read_input_line()))
}

fn sys_date_time(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeFault> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);

    let id = vm.new_table(8)?;
    let table = vm.heap_mut().table_mut(id);
    table.insert(Key::Str("year".into()), Value::Num(year as f64));
    table.insert(Key::Str("month".into()), Value::Num(month as f64));
    table.insert(Key::Str("day".into()), Value::Num(day as f64));
    table.insert(Key::Str("hour".into()), Value::Num((rem / 3600) as f64));
    table.insert(
        Key::Str("minute".into()),
        Value::Num((rem % 3600 / 60) as f64),
    );
    table.insert(Key::Str("second".into()), Value::Num((rem % 60) as f64));
    Ok(Value::Table(id))
}

/// Days-since-epoch to civil date (proleptic Gregorian).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let days = days + 719_468;
    let era = days.div_euclid(146_097);
    let doe = days.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}

fn sys_time(_vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeFault> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Num(secs.floor()))
}

fn sys_clock(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeFault> {
    Ok(Value::Num(vm.elapsed_ms() as f64))
}

fn sys_sleep(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let ms = arg(args, 0).to_number();
    if ms > 0.0 {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
    Ok(Value::Unset)
}

fn sys_rnd(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let sample = vm.random();
    Ok(match args {
        [] => Value::Num(sample),
        _ => {
            let bound = arg(args, 0).to_number();
            if bound > 0.0 {
                Value::Num((sample * bound).floor())
            } else {
                Value::Num(0.0)
            }
        }
    })
}

fn sys_randomize(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    vm.reseed(arg(args, 0).to_number() as u64);
    Ok(Value::Unset)
}

fn sys_split_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let text = vm.display(arg(args, 0));
    let parts: Vec<String> = match args.get(1) {
        Some(Value::Str(delim)) if !delim.is_empty() => {
            text.split(delim.as_str()).map(str::to_owned).collect()
        }
        _ => text.split_whitespace().map(str::to_owned).collect(),
    };

    let id = vm.new_table(parts.len().max(1))?;
    let table = vm.heap_mut().table_mut(id);
    for (index, part) in parts.into_iter().enumerate() {
        table.insert(Key::Int(index as i64), Value::Str(part));
    }
    vm.sync_table(id)?;
    Ok(Value::Table(id))
}

fn sys_left_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let text = vm.display(arg(args, 0));
    let count = arg(args, 1).to_number().max(0.0) as usize;
    Ok(Value::Str(text.chars().take(count).collect()))
}

fn sys_right_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let text = vm.display(arg(args, 0));
    let count = arg(args, 1).to_number().max(0.0) as usize;
    let len = text.chars().count();
    Ok(Value::Str(text.chars().skip(len.saturating_sub(count)).collect()))
}

fn sys_mid_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let text = vm.display(arg(args, 0));
    let start = arg(args, 1).to_number().max(0.0) as usize;
    let count = match args.get(2) {
        Some(v) => v.to_number().max(0.0) as usize,
        None => 1,
    };
    Ok(Value::Str(text.chars().skip(start).take(count).collect()))
}

fn sys_in_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let haystack = vm.display(arg(args, 0));
    let needle = vm.display(arg(args, 1));
    let start = match args.get(2) {
        Some(v) => v.to_number().max(0.0) as usize,
        None => 0,
    };

    let skipped: String = haystack.chars().skip(start).collect();
    let found = skipped
        .find(&needle)
        .map(|byte_pos| start + skipped[..byte_pos].chars().count());
    Ok(Value::Num(found.map_or(-1.0, |pos| pos as f64)))
}

fn sys_replace_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let text = vm.display(arg(args, 0));
    let from = vm.display(arg(args, 1));
    let to = vm.display(arg(args, 2));
    if from.is_empty() {
        return Ok(Value::Str(text));
    }
    Ok(Value::Str(text.replace(&from, &to)))
}

fn sys_lower_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    Ok(Value::Str(vm.display(arg(args, 0)).to_lowercase()))
}

fn sys_upper_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    Ok(Value::Str(vm.display(arg(args, 0)).to_uppercase()))
}

fn sys_chr(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let code = arg(args, 0).to_number().max(0.0) as u32;
    Ok(Value::Str(
        char::from_u32(code).map(String::from).unwrap_or_default(),
    ))
}

fn sys_asc(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let text = vm.display(arg(args, 0));
    Ok(Value::Num(
        text.chars().next().map_or(0.0, |c| u32::from(c) as f64),
    ))
}

fn sys_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let decimals = match args.get(1) {
        Some(v) => v.to_number().max(0.0) as usize,
        None => crate::consts::TO_STRING_DECIMALS,
    };
    Ok(Value::Str(match arg(args, 0) {
        Value::Num(n) => format_number(*n, decimals),
        other => vm.display(other),
    }))
}

fn sys_tbl_has_key(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let id = table_arg(args, 0)?;
    let key = key_arg(args, 1)?;
    Ok(Value::Num(f64::from(u8::from(
        vm.heap().table(id).exists(&key),
    ))))
}

fn sys_tbl_has_value(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let id = table_arg(args, 0)?;
    let needle = arg(args, 1);
    let found = vm
        .heap()
        .table(id)
        .values()
        .any(|v| crate::value::strict_equal(v, needle));
    Ok(Value::Num(f64::from(u8::from(found))))
}

fn sys_tbl_key_of(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let id = table_arg(args, 0)?;
    let needle = arg(args, 1);
    let key = vm
        .heap()
        .table(id)
        .iter()
        .find(|(_, v)| crate::value::strict_equal(v, needle))
        .map(|(k, _)| k.clone());
    Ok(match key {
        Some(Key::Str(s)) => Value::Str(s),
        Some(Key::Int(i)) => Value::Num(i as f64),
        None => Value::Unset,
    })
}

fn sys_tbl_free_key(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let id = table_arg(args, 0)?;
    let key = key_arg(args, 1)?;
    let table = vm.heap_mut().table_mut(id);
    if table.lock > 0 {
        return Err(RuntimeFault::runtime("Table is locked"));
    }
    table.remove(&key);
    Ok(Value::Unset)
}

fn sys_tbl_free_value(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let id = table_arg(args, 0)?;
    let needle = arg(args, 1).clone();
    let table = vm.heap_mut().table_mut(id);
    if table.lock > 0 {
        return Err(RuntimeFault::runtime("Table is locked"));
    }
    let key = table
        .iter()
        .find(|(_, v)| crate::value::strict_equal(v, &needle))
        .map(|(k, _)| k.clone());
    if let Some(key) = key {
        table.remove(&key);
    }
    Ok(Value::Unset)
}

fn sys_tbl_clear(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let id = table_arg(args, 0)?;
    let table = vm.heap_mut().table_mut(id);
    if table.lock > 0 {
        return Err(RuntimeFault::runtime("Table is locked"));
    }
    table.clear();
    Ok(Value::Unset)
}

fn sys_tbl_insert(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeFault> {
    let id = table_arg(args, 0)?;
    match args.len() {
        0..=1 => Err(RuntimeFault::runtime("Missing value to insert")),
        2 => {
            let value = arg(args, 1).clone();
            let table = vm.heap_mut().table_mut(id);
            let mut index = 0;
            while table.exists(&Key::Int(index)) {
                index += 1;
            }
            table.insert(Key::Int(index), value);
            vm.sync_table(id)?;
            Ok(Value::Num(index as f64))
        }
        _ => {
            let key = key_arg(args, 1)?;
            let value = arg(args, 2).clone();
            vm.heap_mut().table_mut(id).insert(key, value);
            vm.sync_table(id)?;
            Ok(Value::Unset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::EnumCount;

    #[test]
    fn command_indices_are_contractual() {
        assert_eq!(SysCommand::Pln as u16, 0);
        assert_eq!(SysCommand::SplitStr as u16, 11);
        assert_eq!(SysCommand::W3dRender as u16, 124);
        assert_eq!(SysCommand::FileSeek as u16, SysCommand::COUNT as u16 - 1);
    }

    #[test]
    fn from_index_round_trips() {
        for (index, command) in SysCommand::iter().enumerate() {
            assert_eq!(SysCommand::from_index(index), Some(command));
            assert_eq!(command as usize, index);
        }
        assert_eq!(SysCommand::from_index(SysCommand::COUNT), None);
    }

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        assert_eq!(civil_from_days(59), (1970, 3, 1));
    }
}
