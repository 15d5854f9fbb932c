use super::*;

fn build_table(entries: &str) -> String {
    format!(
        "mload\n\
         madd .t\n\
         mload .t\n\
         ctbl @0\n\
         mset @0\n\
         {entries}"
    )
}

fn set_int_entry(index: i32, value: i32) -> String {
    format!(
        "madd {index}\n\
         mpush\n\
         mload {index}\n\
         mset {value}\n\
         mpop\n"
    )
}

#[test]
fn iteration_visits_every_entry_once() {
    let entries = format!(
        "{}{}{}",
        set_int_entry(0, 10),
        set_int_entry(1, 20),
        set_int_entry(2, 30)
    );
    let source = format!(
        "{}iload\n\
         loop:\n\
         ihas\n\
         jmpf done\n\
         ival @1\n\
         add @2 @1\n\
         ikey @3\n\
         add @4 @3\n\
         istep\n\
         jmp loop\n\
         done:\n\
         idel\n",
        build_table(&entries)
    );
    let (vm, _) = run_ok(&source);
    assert_eq!(reg_num(&vm, 2), 60.0);
    assert_eq!(reg_num(&vm, 4), 3.0);
}

#[test]
fn wrapper_iterators_hide_keys() {
    let source = format!(
        "{}iload 1\n\
         ihas\n\
         jmpf done\n\
         ival @1\n\
         ikey @2\n\
         done:\n\
         idel\n",
        build_table(&set_int_entry(0, 7))
    );
    let (vm, _) = run_ok(&source);
    assert_eq!(reg_num(&vm, 1), 7.0);
    assert_eq!(vm.registers()[2], Value::Unset);
}

#[test]
fn string_keys_come_back_as_strings() {
    let entries = "madd .name\n\
                   mpush\n\
                   mload .name\n\
                   mset \"odin\"\n\
                   mpop\n";
    let source = format!(
        "{}iload\n\
         ival @1\n\
         ikey @2\n\
         idel\n",
        build_table(entries)
    );
    let (vm, _) = run_ok(&source);
    assert_eq!(reg_str(&vm, 1), "odin");
    assert_eq!(reg_str(&vm, 2), "name");
}

#[test]
fn updates_during_iteration_stay_visible() {
    // The entry set is frozen at ILOAD, values are read live.
    let source = format!(
        "{}iload\n\
         mpush\n\
         mload 0\n\
         mset 99\n\
         mpop\n\
         ival @1\n\
         idel\n",
        build_table(&set_int_entry(0, 1))
    );
    let (vm, _) = run_ok(&source);
    assert_eq!(reg_num(&vm, 1), 99.0);
}

#[test]
fn inserts_during_iteration_do_not_extend_the_snapshot() {
    let source = format!(
        "{}iload\n\
         madd 5\n\
         move @2 0\n\
         loop:\n\
         ihas\n\
         jmpf done\n\
         move @3 1\n\
         add @2 @3\n\
         istep\n\
         jmp loop\n\
         done:\n\
         idel\n",
        build_table(&set_int_entry(0, 1))
    );
    let (vm, _) = run_ok(&source);
    // One entry at snapshot time, however many exist now.
    assert_eq!(reg_num(&vm, 2), 1.0);
}

#[test]
fn nested_iterators_walk_independently() {
    let entries = format!("{}{}", set_int_entry(0, 1), set_int_entry(1, 2));
    let source = format!(
        "{}iload\n\
         outer:\n\
         ihas\n\
         jmpf outer_done\n\
         ipush\n\
         iload\n\
         inner:\n\
         ihas\n\
         jmpf inner_done\n\
         ival @1\n\
         add @2 @1\n\
         istep\n\
         jmp inner\n\
         inner_done:\n\
         idel\n\
         ipop\n\
         istep\n\
         jmp outer\n\
         outer_done:\n\
         idel\n",
        build_table(&entries)
    );
    let (vm, _) = run_ok(&source);
    // Two outer passes, each summing both values.
    assert_eq!(reg_num(&vm, 2), 6.0);
}

#[test]
fn iterating_a_non_table_fails() {
    let message = run_err("mload\nmadd .x\nmload .x\nmset 1\niload\n");
    assert!(message.contains("Variable is not a table"), "{message}");
}

#[test]
fn stepping_without_an_iterator_fails() {
    let message = run_err("istep\n");
    assert!(message.contains("No iterator loaded"), "{message}");
}

#[test]
fn ipop_below_the_stack_fails() {
    let message = run_err("ipop\n");
    assert!(message.contains("Iterator stack is empty"), "{message}");
}

#[test]
fn lock_counts_nest_with_ipush() {
    // Two iterators over the same table: deleting stays forbidden until
    // both are released.
    let source = format!(
        "{}iload\n\
         ipush\n\
         iload\n\
         idel\n\
         ipop\n\
         mdel 0\n",
        build_table(&set_int_entry(0, 1))
    );
    let message = run_err(&source);
    assert!(message.contains("Table is locked"), "{message}");

    let source = format!(
        "{}iload\n\
         ipush\n\
         iload\n\
         idel\n\
         ipop\n\
         idel\n\
         mdel 0\n\
         size @1 @0\n",
        build_table(&set_int_entry(0, 1))
    );
    let (vm, _) = run_ok(&source);
    assert_eq!(reg_num(&vm, 1), 0.0);
}
