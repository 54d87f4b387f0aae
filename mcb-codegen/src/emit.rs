//! Assembly text emission

use crate::function::Function;
use crate::target::Target;

/// Render one function: header lines, then one line per instruction
pub fn emit_function<T: Target>(target: &T, func: &Function<T::Opcode>) -> String {
    let mut out = String::new();
    for line in target.function_header(&func.name) {
        out.push_str(&line);
        out.push('\n');
    }
    for inst in func.insts.instructions() {
        out.push_str(&target.format_instruction(inst));
        out.push('\n');
    }
    out
}

/// Render a whole program: a `.text` directive followed by every function,
/// separated by blank lines
pub fn emit_program<'a, T, I>(target: &T, functions: I) -> String
where
    T: Target,
    T::Opcode: 'a,
    I: IntoIterator<Item = &'a Function<T::Opcode>>,
{
    let mut out = String::from("\t.text\n");
    for func in functions {
        out.push('\n');
        out.push_str(&emit_function(target, func));
    }
    out
}
