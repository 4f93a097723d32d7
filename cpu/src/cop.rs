// SPDX-License-Identifier: MPL-2.0

//! The generic coprocessors, COP2 and COP3.
//!
//! Neither is attached to any functional unit here; each is a bank of 32 data and 32 control
//! registers that software can move values into and out of, gated by its `Status.CU` bit.

use serde::{Deserialize, Serialize};

use crate::{
    exc::{Exception, Kind},
    instr::{decode::Opcode, sign_extend_32},
    Bus,
    Cpu,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bank {
    pub regs: [u64; 32],
    pub ctrl: [u64; 32],
}

impl<B: Bus + ?Sized> Cpu<'_, '_, B> {
    fn bank_mut(&mut self, unit: u8) -> &mut Bank {
        match unit {
            2 => &mut self.cop2,
            _ => &mut self.cop3,
        }
    }

    /// Executes a register move for COP2 or COP3.
    pub(crate) fn execute_cop(&mut self, unit: u8, op: Opcode) -> Result<(), Exception> {
        self.check_cop_usable(unit)?;

        let (rt, rd) = (op.rt(), op.rd());
        let value = self.reg.gpr(rt);
        let bank = self.bank_mut(unit);
        let result = match op.rs() {
            0x00 => sign_extend_32(bank.regs[rd] as u32),
            0x01 => bank.regs[rd],
            0x02 => sign_extend_32(bank.ctrl[rd] as u32),
            0x04 => {
                bank.regs[rd] = sign_extend_32(value as u32);
                return Ok(());
            }
            0x05 => {
                bank.regs[rd] = value;
                return Ok(());
            }
            0x06 => {
                bank.ctrl[rd] = sign_extend_32(value as u32);
                return Ok(());
            }
            _ => return Err(Exception::new(Kind::ReservedInstr)),
        };
        self.reg.set_gpr(rt, result);

        Ok(())
    }

    /// `LWCz` and `LDCz`.
    pub(crate) fn execute_cop_load(&mut self, unit: u8, op: Opcode, double: bool) -> Result<(), Exception> {
        self.check_cop_usable(unit)?;

        let vaddr = self.vaddr(op);
        let value = if double {
            self.read_64(vaddr)?
        } else {
            sign_extend_32(self.read_32(vaddr)?)
        };
        self.bank_mut(unit).regs[op.rt()] = value;

        Ok(())
    }

    /// `SWCz` and `SDCz`.
    pub(crate) fn execute_cop_store(&mut self, unit: u8, op: Opcode, double: bool) -> Result<(), Exception> {
        self.check_cop_usable(unit)?;

        let vaddr = self.vaddr(op);
        let value = self.bank_mut(unit).regs[op.rt()];
        if double {
            self.write_64(vaddr, value)
        } else {
            self.write_32(vaddr, value as u32)
        }
    }
}
